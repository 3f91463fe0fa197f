// Copyright 2024 The salamander developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use aes::{
    cipher::{generic_array::GenericArray, BlockSizeUser, KeySizeUser},
    Aes256,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

type Aes256Key = GenericArray<u8, <Aes256 as KeySizeUser>::KeySize>;
// The IV of a CBC mode cipher is one block large.
type Aes256Iv = GenericArray<u8, <Aes256 as BlockSizeUser>::BlockSize>;
type HmacSha256Key = [u8; 32];

#[derive(Zeroize)]
#[zeroize(drop)]
pub(crate) struct ExpandedKeys(Box<[u8; 80]>);

impl ExpandedKeys {
    const OLM_HKDF_INFO: &'static [u8] = b"OLM_KEYS";
    const MEGOLM_HKDF_INFO: &'static [u8] = b"MEGOLM_KEYS";

    fn new(message_key: &[u8; 32]) -> Self {
        Self::new_helper(message_key, Self::OLM_HKDF_INFO)
    }

    fn new_megolm(message_key: &[u8; 128]) -> Self {
        Self::new_helper(message_key, Self::MEGOLM_HKDF_INFO)
    }

    /// Expand the caller-supplied pickle key into the pickle encryption keys.
    ///
    /// Pickles use a salt-less, info-less HKDF invocation so a fixed pickle
    /// key always expands to the same cipher keys.
    fn new_pickle(pickle_key: &[u8]) -> Self {
        let mut expanded_keys = Box::new([0u8; 80]);

        let hkdf: Hkdf<Sha256> = Hkdf::new(None, pickle_key);

        hkdf.expand(b"", expanded_keys.as_mut_slice())
            .expect("We should be able to expand the pickle key");

        Self(expanded_keys)
    }

    fn new_helper(message_key: &[u8], info: &[u8]) -> Self {
        let mut expanded_keys = Box::new([0u8; 80]);

        let hkdf: Hkdf<Sha256> = Hkdf::new(Some(&[0]), message_key);

        hkdf.expand(info, expanded_keys.as_mut_slice())
            .expect("We should be able to expand the message key");

        Self(expanded_keys)
    }

    fn split(&self) -> (Box<[u8; 32]>, Box<[u8; 16]>, Box<[u8; 32]>) {
        let mut aes_key = Box::new([0u8; 32]);
        let mut mac_key = Box::new([0u8; 32]);
        let mut aes_iv = Box::new([0u8; 16]);

        aes_key.copy_from_slice(&self.0[0..32]);
        mac_key.copy_from_slice(&self.0[32..64]);
        aes_iv.copy_from_slice(&self.0[64..80]);

        (aes_key, aes_iv, mac_key)
    }
}

#[derive(Zeroize)]
#[zeroize(drop)]
pub(crate) struct CipherKeys {
    aes_key: Box<[u8; 32]>,
    aes_iv: Box<[u8; 16]>,
    mac_key: Box<[u8; 32]>,
}

impl CipherKeys {
    pub fn new(message_key: &[u8; 32]) -> Self {
        let expanded_keys = ExpandedKeys::new(message_key);

        Self::from_expanded_keys(expanded_keys)
    }

    pub fn new_megolm(message_key: &[u8; 128]) -> Self {
        let expanded_keys = ExpandedKeys::new_megolm(message_key);

        Self::from_expanded_keys(expanded_keys)
    }

    pub fn new_pickle(pickle_key: &[u8]) -> Self {
        let expanded_keys = ExpandedKeys::new_pickle(pickle_key);

        Self::from_expanded_keys(expanded_keys)
    }

    fn from_expanded_keys(expanded_keys: ExpandedKeys) -> Self {
        let (aes_key, aes_iv, mac_key) = expanded_keys.split();

        Self { aes_key, aes_iv, mac_key }
    }

    pub fn aes_key(&self) -> &Aes256Key {
        Aes256Key::from_slice(self.aes_key.as_slice())
    }

    pub fn mac_key(&self) -> &HmacSha256Key {
        &self.mac_key
    }

    pub fn iv(&self) -> &Aes256Iv {
        Aes256Iv::from_slice(self.aes_iv.as_slice())
    }
}
