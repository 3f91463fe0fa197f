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

pub(crate) mod key;

use aes::{
    cipher::{
        block_padding::{Pkcs7, UnpadError},
        BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    },
    Aes256,
};
use hmac::{digest::MacError, Hmac, Mac as MacT};
use key::CipherKeys;
use sha2::Sha256;
use thiserror::Error;

pub(crate) type Aes256CbcEnc = cbc::Encryptor<Aes256>;
pub(crate) type Aes256CbcDec = cbc::Decryptor<Aes256>;
pub(crate) type HmacSha256 = Hmac<Sha256>;

/// The message authentication code of a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mac(pub(crate) [u8; Self::LENGTH]);

impl Mac {
    /// The length of the message authentication code (MAC).
    pub const LENGTH: usize = 32;
    /// The length of the message authentication code (MAC) after truncation
    /// is applied.
    pub const TRUNCATED_LEN: usize = 8;

    /// Truncates and converts the [`Mac`] into a byte array.
    pub fn truncate(&self) -> [u8; Self::TRUNCATED_LEN] {
        let mut truncated = [0u8; Self::TRUNCATED_LEN];
        truncated.copy_from_slice(&self.0[0..Self::TRUNCATED_LEN]);

        truncated
    }

    /// Return the [`Mac`] as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("Failed decrypting, invalid padding")]
    InvalidPadding(#[from] UnpadError),
    #[error("The MAC of the ciphertext didn't pass validation: {0}")]
    Mac(#[from] MacError),
}

/// A cipher used for encrypting and authenticating messages.
pub(crate) struct Cipher {
    keys: CipherKeys,
}

impl Cipher {
    /// Creates a new [`Cipher`] from the given 32-byte message key.
    ///
    /// The key is deterministically expanded into a 32-byte AES key, a
    /// 32-byte MAC key, and a 16-byte initialization vector (IV) using HKDF,
    /// with the byte string "OLM_KEYS" used as the info during key
    /// derivation.
    ///
    /// This key derivation is used for the individual message keys of the
    /// Olm double ratchet as well as for PK encryption.
    pub fn new(key: &[u8; 32]) -> Self {
        let keys = CipherKeys::new(key);

        Self { keys }
    }

    /// Creates a new [`Cipher`] from the given 128-byte ratchet state.
    ///
    /// The key is deterministically expanded using HKDF with the byte string
    /// "MEGOLM_KEYS" as the info, and is used for the individual message keys
    /// of the Megolm ratchet.
    pub fn new_megolm(key: &[u8; 128]) -> Self {
        let keys = CipherKeys::new_megolm(key);

        Self { keys }
    }

    /// Creates a new [`Cipher`] from the given caller-supplied pickle key,
    /// which may be of arbitrary length.
    ///
    /// The key is deterministically expanded using a salt-less and info-less
    /// HKDF invocation. This derivation is used for the encrypted pickle
    /// format.
    pub fn new_pickle(key: &[u8]) -> Self {
        let keys = CipherKeys::new_pickle(key);

        Self { keys }
    }

    fn get_hmac(&self) -> HmacSha256 {
        // We don't use HmacSha256::new() here because it expects a 64-byte
        // large HMAC key while the message key derivation produces a 32-byte
        // one.
        HmacSha256::new_from_slice(self.keys.mac_key())
            .expect("We should be able to create a HmacSha256 from a 32 byte key")
    }

    /// Encrypts the given plaintext using this [`Cipher`] and returns the
    /// ciphertext.
    ///
    /// **Warning**: This is a low-level function and does not provide
    /// authentication for the ciphertext. You must call [`Cipher::mac()`]
    /// separately to generate the message authentication code (MAC).
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256CbcEnc::new(self.keys.aes_key(), self.keys.iv());
        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Generates a message authentication code (MAC) for the given message.
    pub fn mac(&self, message: &[u8]) -> Mac {
        let mut hmac = self.get_hmac();
        hmac.update(message);

        let mac_bytes = hmac.finalize().into_bytes();

        let mut mac = [0u8; Mac::LENGTH];
        mac.copy_from_slice(&mac_bytes);

        Mac(mac)
    }

    /// Decrypts the provided `ciphertext` using this [`Cipher`].
    ///
    /// **Warning**: This is a low-level function. Before calling this, you
    /// must call [`Cipher::verify_truncated_mac()`] to ensure the integrity
    /// of the ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, UnpadError> {
        let cipher = Aes256CbcDec::new(self.keys.aes_key(), self.keys.iv());
        cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    }

    /// Verifies, in constant time, that the provided truncated message
    /// authentication code (MAC) correctly authenticates the given message.
    ///
    /// **Warning**: This is a low-level function and must be called before
    /// invoking the [`Cipher::decrypt()`] method.
    pub fn verify_truncated_mac(&self, message: &[u8], tag: &[u8]) -> Result<(), MacError> {
        let mut hmac = self.get_hmac();

        hmac.update(message);
        hmac.verify_truncated_left(tag)
    }
}

#[cfg(test)]
mod test {
    use super::{Cipher, Mac};

    #[test]
    fn encryption_round_trip() {
        let cipher = Cipher::new(&[1u8; 32]);
        let plaintext = b"It's a secret to everybody";

        let ciphertext = cipher.encrypt(plaintext);
        let mac = cipher.mac(&ciphertext);

        cipher
            .verify_truncated_mac(&ciphertext, &mac.truncate())
            .expect("A MAC we ourselves created should verify");

        let decrypted = cipher.decrypt(&ciphertext).expect("The ciphertext should decrypt");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let cipher = Cipher::new(&[1u8; 32]);

        let ciphertext = cipher.encrypt(b"It's a secret to everybody");
        let mut mac = cipher.mac(&ciphertext).truncate();
        mac[0] ^= 0b1;

        cipher
            .verify_truncated_mac(&ciphertext, &mac)
            .expect_err("A tampered MAC shouldn't verify");
    }

    #[test]
    fn mac_truncation() {
        let mac = Mac([0xAAu8; Mac::LENGTH]);

        assert_eq!(mac.truncate(), [0xAAu8; Mac::TRUNCATED_LEN]);
        assert_eq!(mac.as_bytes().len(), Mac::LENGTH);
    }
}
