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

//! The triple Diffie-Hellman handshake which bootstraps an Olm session.
//!
//! The setup takes four Curve25519 inputs: identity keys for Alice and Bob,
//! (Ia, Ib), and single-use keys for Alice and Bob (Ea, Eb).
//!
//! A shared secret S is generated via triple Diffie-Hellman using the above
//! inputs. The initial 256-bit root key R0 and a 256-bit chain key C0,0 are
//! derived from the shared secret using HKDF-SHA-256 with the default salt
//! and "OLM_ROOT" as the info.
//!
//! ```text
//!     S = ECDH(Ia, Eb) || ECDH(Ea, Ib) || ECDH(Ea, Eb)
//!
//!     R0, C0,0 = HKDF(0, S, "OLM_ROOT", 64)
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{ReusableSecret, SharedSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{types::Curve25519SecretKey, Curve25519PublicKey};

#[derive(Zeroize, ZeroizeOnDrop)]
pub(super) struct Shared3DHSecret(Box<[u8; 96]>);

#[derive(Zeroize, ZeroizeOnDrop)]
pub(super) struct RemoteShared3DHSecret(Box<[u8; 96]>);

fn expand(shared_secret: &[u8; 96]) -> (Box<[u8; 32]>, Box<[u8; 32]>) {
    let hkdf: Hkdf<Sha256> = Hkdf::new(Some(&[0]), shared_secret);
    let mut root_key = Box::new([0u8; 32]);
    let mut chain_key = Box::new([0u8; 32]);

    let mut expanded_keys = [0u8; 64];

    hkdf.expand(b"OLM_ROOT", &mut expanded_keys)
        .expect("We should be able to expand the shared 3DH secret into the root key");

    root_key.copy_from_slice(&expanded_keys[0..32]);
    chain_key.copy_from_slice(&expanded_keys[32..64]);

    expanded_keys.zeroize();

    (root_key, chain_key)
}

fn merge_secrets(
    first_secret: SharedSecret,
    second_secret: SharedSecret,
    third_secret: SharedSecret,
) -> Box<[u8; 96]> {
    let mut secret = Box::new([0u8; 96]);

    secret[0..32].copy_from_slice(first_secret.as_bytes());
    secret[32..64].copy_from_slice(second_secret.as_bytes());
    secret[64..96].copy_from_slice(third_secret.as_bytes());

    secret
}

impl RemoteShared3DHSecret {
    pub(crate) fn new(
        identity_key: &Curve25519SecretKey,
        one_time_key: &Curve25519SecretKey,
        remote_identity_key: &Curve25519PublicKey,
        remote_one_time_key: &Curve25519PublicKey,
    ) -> Option<Self> {
        let first_secret = one_time_key.diffie_hellman(remote_identity_key);
        let second_secret = identity_key.diffie_hellman(remote_one_time_key);
        let third_secret = one_time_key.diffie_hellman(remote_one_time_key);

        if first_secret.was_contributory()
            && second_secret.was_contributory()
            && third_secret.was_contributory()
        {
            Some(Self(merge_secrets(first_secret, second_secret, third_secret)))
        } else {
            None
        }
    }

    pub fn expand(self) -> (Box<[u8; 32]>, Box<[u8; 32]>) {
        expand(&self.0)
    }
}

impl Shared3DHSecret {
    pub(crate) fn new(
        identity_key: &Curve25519SecretKey,
        base_key: &ReusableSecret,
        remote_identity_key: &Curve25519PublicKey,
        remote_one_time_key: &Curve25519PublicKey,
    ) -> Option<Self> {
        let first_secret = identity_key.diffie_hellman(remote_one_time_key);
        let second_secret = base_key.diffie_hellman(&remote_identity_key.inner);
        let third_secret = base_key.diffie_hellman(&remote_one_time_key.inner);

        if first_secret.was_contributory()
            && second_secret.was_contributory()
            && third_secret.was_contributory()
        {
            Some(Self(merge_secrets(first_secret, second_secret, third_secret)))
        } else {
            None
        }
    }

    pub fn expand(self) -> (Box<[u8; 32]>, Box<[u8; 32]>) {
        expand(&self.0)
    }
}

#[cfg(test)]
mod test {
    use rand::thread_rng;
    use x25519_dalek::ReusableSecret;

    use super::{RemoteShared3DHSecret, Shared3DHSecret};
    use crate::{types::Curve25519SecretKey, Curve25519PublicKey};

    #[test]
    fn triple_diffie_hellman() {
        let rng = thread_rng();

        let alice_identity = Curve25519SecretKey::new();
        let alice_base_key = ReusableSecret::random_from_rng(rng);

        let bob_identity = Curve25519SecretKey::new();
        let bob_one_time = Curve25519SecretKey::new();

        let alice_secret = Shared3DHSecret::new(
            &alice_identity,
            &alice_base_key,
            &Curve25519PublicKey::from(&bob_identity),
            &Curve25519PublicKey::from(&bob_one_time),
        )
        .expect("Both sides generated real keys");

        let bob_secret = RemoteShared3DHSecret::new(
            &bob_identity,
            &bob_one_time,
            &Curve25519PublicKey::from(&alice_identity),
            &Curve25519PublicKey::from(&alice_base_key),
        )
        .expect("Both sides generated real keys");

        assert_eq!(alice_secret.0, bob_secret.0);

        let alice_result = alice_secret.expand();
        let bob_result = bob_secret.expand();

        assert_eq!(alice_result, bob_result);
    }

    #[test]
    fn non_contributory_key_is_rejected() {
        let rng = thread_rng();

        let alice_identity = Curve25519SecretKey::new();
        let alice_base_key = ReusableSecret::random_from_rng(rng);

        let bob_identity = Curve25519SecretKey::new();
        let bob_one_time = Curve25519SecretKey::new();

        let low_order_key = Curve25519PublicKey::from_bytes([0u8; 32]);

        let alice_secret = Shared3DHSecret::new(
            &alice_identity,
            &alice_base_key,
            &Curve25519PublicKey::from(&bob_identity),
            &low_order_key,
        );

        assert!(alice_secret.is_none());

        let bob_secret = RemoteShared3DHSecret::new(
            &bob_identity,
            &bob_one_time,
            &low_order_key,
            &Curve25519PublicKey::from(&alice_base_key),
        );

        assert!(bob_secret.is_none());
    }
}
