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

use std::fmt::Display;

use rand::{thread_rng, CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{EphemeralSecret, PublicKey, ReusableSecret, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use crate::{utilities::base64_decode, utilities::base64_encode, KeyError};

/// A Curve25519 secret key.
#[derive(Clone)]
pub struct Curve25519SecretKey(Box<StaticSecret>);

impl Curve25519SecretKey {
    /// The number of bytes a Curve25519 secret key has.
    pub const LENGTH: usize = 32;

    /// Generate a new, random, Curve25519 secret key.
    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    /// Generate a new Curve25519 secret key using the given source of
    /// randomness.
    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self(Box::new(StaticSecret::random_from_rng(rng)))
    }

    /// Create a `Curve25519SecretKey` from the given slice of bytes.
    ///
    /// The bytes are clamped as required by the X25519 function.
    pub fn from_slice(bytes: &[u8; 32]) -> Self {
        // StaticSecret::from() clamps the bytes for us.
        Self(Box::new(StaticSecret::from(*bytes)))
    }

    /// Perform a Diffie-Hellman key exchange between this secret key and the
    /// given public key, producing a shared secret.
    pub fn diffie_hellman(&self, their_public_key: &Curve25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(&their_public_key.inner)
    }

    /// Convert the secret key to a byte array.
    ///
    /// **Warning**: The caller is responsible for zeroizing the array after
    /// use.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl Default for Curve25519SecretKey {
    fn default() -> Self {
        Self::new()
    }
}

impl From<[u8; 32]> for Curve25519SecretKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self::from_slice(&bytes)
    }
}

/// A Curve25519 public key.
#[derive(PartialEq, Eq, Hash, Copy, Clone)]
pub struct Curve25519PublicKey {
    pub(crate) inner: PublicKey,
}

impl Curve25519PublicKey {
    /// The number of bytes a Curve25519 public key has.
    pub const LENGTH: usize = 32;

    /// View this public key as a byte array.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        self.inner.as_bytes()
    }

    /// Convert this public key to a byte array.
    #[inline]
    pub fn to_bytes(self) -> [u8; Self::LENGTH] {
        self.inner.to_bytes()
    }

    /// Create a `Curve25519PublicKey` from a byte array.
    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self { inner: PublicKey::from(bytes) }
    }

    /// Try to create a `Curve25519PublicKey` from a slice of bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let key_len = slice.len();

        if key_len == Self::LENGTH {
            let mut key = [0u8; Self::LENGTH];
            key.copy_from_slice(slice);

            Ok(Self::from_bytes(key))
        } else {
            Err(KeyError::InvalidKeyLength {
                key_type: "Curve25519",
                expected_length: Self::LENGTH,
                length: key_len,
            })
        }
    }

    /// Instantiate a `Curve25519PublicKey` from an unpadded base64
    /// representation.
    pub fn from_base64(base64_key: &str) -> Result<Self, KeyError> {
        let mut key = base64_decode(base64_key)?;
        let ret = Self::from_slice(&key);

        key.zeroize();

        ret
    }

    /// Serialize the `Curve25519PublicKey` to an unpadded base64
    /// representation.
    pub fn to_base64(&self) -> String {
        base64_encode(self.inner.as_bytes())
    }
}

impl From<[u8; Self::LENGTH]> for Curve25519PublicKey {
    fn from(bytes: [u8; Self::LENGTH]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl<'a> From<&'a Curve25519SecretKey> for Curve25519PublicKey {
    fn from(secret: &'a Curve25519SecretKey) -> Self {
        Self { inner: PublicKey::from(secret.0.as_ref()) }
    }
}

impl<'a> From<&'a EphemeralSecret> for Curve25519PublicKey {
    fn from(secret: &'a EphemeralSecret) -> Self {
        Self { inner: PublicKey::from(secret) }
    }
}

impl<'a> From<&'a ReusableSecret> for Curve25519PublicKey {
    fn from(secret: &'a ReusableSecret) -> Self {
        Self { inner: PublicKey::from(secret) }
    }
}

impl Display for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl std::fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = format!("curve25519:{self}");
        <str as std::fmt::Debug>::fmt(&s, f)
    }
}

impl Serialize for Curve25519PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Curve25519PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        Self::from_base64(&key).map_err(serde::de::Error::custom)
    }
}

/// A Curve25519 key pair, holding both the secret and the public part of the
/// identity key of an account.
#[derive(Clone)]
pub(crate) struct Curve25519Keypair {
    secret_key: Curve25519SecretKey,
    public_key: Curve25519PublicKey,
}

impl Curve25519Keypair {
    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let secret_key = Curve25519SecretKey::new_from_rng(rng);
        let public_key = Curve25519PublicKey::from(&secret_key);

        Self { secret_key, public_key }
    }

    pub fn from_secret_key(bytes: &[u8; 32]) -> Self {
        let secret_key = Curve25519SecretKey::from_slice(bytes);
        let public_key = Curve25519PublicKey::from(&secret_key);

        Self { secret_key, public_key }
    }

    pub const fn secret_key(&self) -> &Curve25519SecretKey {
        &self.secret_key
    }

    pub const fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{Curve25519PublicKey, Curve25519SecretKey};
    use crate::KeyError;

    #[test]
    fn decoding_invalid_base64_fails() {
        let base64_payload = "a ";
        assert_matches!(
            Curve25519PublicKey::from_base64(base64_payload),
            Err(KeyError::Base64Error(_))
        );
    }

    #[test]
    fn decoding_incorrect_number_of_bytes_fails() {
        let base64_payload = "aaaa";
        assert_matches!(
            Curve25519PublicKey::from_base64(base64_payload),
            Err(KeyError::InvalidKeyLength { .. })
        );
    }

    #[test]
    fn base64_round_trip() {
        let base64_payload = "MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA";
        let key = Curve25519PublicKey::from_base64(base64_payload)
            .expect("A correctly sized key should decode");

        assert_eq!(key.to_base64(), base64_payload);
    }

    #[test]
    fn rfc7748_diffie_hellman() {
        // RFC 7748 section 6.1 test vectors.
        let alice_secret: [u8; 32] = [
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2,
            0x66, 0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5,
            0x1d, 0xb9, 0x2c, 0x2a,
        ];
        let bob_public: [u8; 32] = [
            0xde, 0x9e, 0xdb, 0x7d, 0x7b, 0x7d, 0xc1, 0xb4, 0xd3, 0x5b, 0x61, 0xc2, 0xec, 0xe4,
            0x35, 0x37, 0x3f, 0x83, 0x43, 0xc8, 0x5b, 0x78, 0x67, 0x4d, 0xad, 0xfc, 0x7e, 0x14,
            0x6f, 0x88, 0x2b, 0x4f,
        ];
        let expected_shared: [u8; 32] = [
            0x4a, 0x5d, 0x9d, 0x5b, 0xa4, 0xce, 0x2d, 0xe1, 0x72, 0x8e, 0x3b, 0xf4, 0x80, 0x35,
            0x0f, 0x25, 0xe0, 0x7e, 0x21, 0xc9, 0x47, 0xd1, 0x9e, 0x33, 0x76, 0xf0, 0x9b, 0x3c,
            0x1e, 0x16, 0x17, 0x42,
        ];

        let alice = Curve25519SecretKey::from_slice(&alice_secret);
        let shared = alice.diffie_hellman(&Curve25519PublicKey::from_bytes(bob_public));

        assert_eq!(shared.as_bytes(), &expected_shared);
    }
}
