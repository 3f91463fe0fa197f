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

//! An Ed25519 signer seeded by the caller.
//!
//! Unlike the signing key pair of an [`Account`], the key material of a
//! [`PkSigning`] object is derived from a seed the caller supplies, so the
//! same seed always reconstructs the same signer. Signatures themselves are
//! deterministic as per RFC 8032.
//!
//! [`Account`]: crate::olm::Account

use thiserror::Error;
use zeroize::Zeroize;

use crate::{utilities::base64_decode, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature};

/// Error type describing the failure modes of creating a [`PkSigning`]
/// object from a seed.
#[derive(Debug, Error)]
pub enum InvalidSeed {
    /// The seed wasn't valid base64.
    #[error("The seed wasn't valid base64: {0}")]
    Base64(#[from] crate::Base64DecodeError),
    /// The seed didn't have the correct length.
    #[error("The seed had an invalid length, expected 32 bytes, got {0}")]
    Length(usize),
}

/// A signing key pair seeded by the caller, producing deterministic Ed25519
/// signatures.
pub struct PkSigning {
    key: Ed25519SecretKey,
    public_key: Ed25519PublicKey,
}

impl PkSigning {
    /// Create a `PkSigning` object from the given 32-byte seed.
    ///
    /// The same seed always produces the same key pair.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let key = Ed25519SecretKey::from_slice(seed);
        let public_key = key.public_key();

        Self { key, public_key }
    }

    /// Create a `PkSigning` object from an unpadded base64-encoded seed.
    pub fn from_base64(seed: &str) -> Result<Self, InvalidSeed> {
        let mut decoded = base64_decode(seed)?;

        if decoded.len() != Ed25519SecretKey::LENGTH {
            let length = decoded.len();
            decoded.zeroize();

            Err(InvalidSeed::Length(length))
        } else {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&decoded);

            let ret = Self::from_seed(&seed);

            seed.zeroize();
            decoded.zeroize();

            Ok(ret)
        }
    }

    /// The seed this signer was created from.
    ///
    /// **Warning**: The returned bytes are secret material and need to be
    /// zeroized by the caller.
    pub fn seed(&self) -> [u8; 32] {
        self.key.as_bytes()
    }

    /// Get the public part of the signing key pair.
    pub const fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    /// Sign the given message with the secret part of the key pair.
    pub fn sign(&self, message: impl AsRef<[u8]>) -> Ed25519Signature {
        self.key.sign(message.as_ref())
    }
}

impl TryFrom<&str> for PkSigning {
    type Error = InvalidSeed;

    fn try_from(seed: &str) -> Result<Self, Self::Error> {
        Self::from_base64(seed)
    }
}

#[cfg(test)]
mod test {
    use super::PkSigning;
    use crate::utilities::base64_encode;

    #[test]
    fn signing_is_deterministic() {
        let seed = [42u8; 32];

        let first = PkSigning::from_seed(&seed);
        let second = PkSigning::from_seed(&seed);

        assert_eq!(first.public_key(), second.public_key());

        let message = "It's a secret to everybody";

        let first_signature = first.sign(message);
        let second_signature = second.sign(message);

        assert_eq!(first_signature.to_bytes(), second_signature.to_bytes());

        first
            .public_key()
            .verify(message.as_bytes(), &first_signature)
            .expect("Our own signature should verify");
    }

    #[test]
    fn base64_seed_round_trip() {
        let seed = [1u8; 32];
        let encoded = base64_encode(seed);

        let signer =
            PkSigning::from_base64(&encoded).expect("A correctly sized seed should be accepted");

        assert_eq!(signer.seed(), seed);
        assert!(PkSigning::from_base64("dG9vLXNob3J0").is_err());
    }
}
