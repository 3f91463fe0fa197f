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

//! User-friendly key verification using short authentication strings (SAS).
//!
//! The verification process is *mutual*: each party creates a [`Sas`]
//! object, shares the public key with the other side, and feeds the received
//! public key into its own object to produce an [`EstablishedSas`]. Both
//! sides then derive the same short byte string from the shared secret and
//! compare it over an authenticated channel (usually the users comparing a
//! handful of emoji or digits out loud).
//!
//! # Examples
//!
//! ```
//! use anyhow::Result;
//! use salamander::sas::Sas;
//!
//! fn main() -> Result<()> {
//!     let alice = Sas::new();
//!     let bob = Sas::new();
//!
//!     let alice_public_key = alice.public_key();
//!     let bob_public_key = bob.public_key();
//!
//!     let alice_established = alice.diffie_hellman(bob_public_key)?;
//!     let bob_established = bob.diffie_hellman(alice_public_key)?;
//!
//!     let alice_bytes = alice_established.generate_bytes("AUTH_INFO", 5)?;
//!     let bob_bytes = bob_established.generate_bytes("AUTH_INFO", 5)?;
//!
//!     assert_eq!(alice_bytes, bob_bytes);
//!
//!     Ok(())
//! }
//! ```

use hkdf::Hkdf;
use hmac::{digest::MacError, Hmac, Mac};
use rand::{thread_rng, CryptoRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, SharedSecret};
use zeroize::Zeroize;

use crate::{
    utilities::{base64_decode, base64_encode},
    Curve25519PublicKey, KeyError,
};

type HmacSha256 = Hmac<Sha256>;

/// Error type describing the failure modes of the SAS establishment and MAC
/// verification.
#[derive(Debug, Error)]
pub enum SasError {
    /// The public key of the other side couldn't be decoded.
    #[error("The public key of the other side was invalid: {0}")]
    InvalidKey(#[from] KeyError),
    /// The shared secret would have been all zeros, the other side's public
    /// key did not have contributory behaviour.
    #[error("The public key of the other side did not have contributory behaviour")]
    NonContributoryKey,
    /// The requested output is longer than HKDF-SHA-256 can produce.
    #[error("The requested output length is too long for the key derivation")]
    InvalidLength(#[from] hkdf::InvalidLength),
    /// The MAC that should be verified wasn't valid base64.
    #[error("The MAC wasn't valid base64: {0}")]
    Base64(#[from] crate::Base64DecodeError),
    /// The MAC failed to be verified.
    #[error("The MAC was invalid: {0}")]
    Mac(#[from] MacError),
}

/// A struct representing one side of a short-authentication-string
/// verification, before the other side's public key was received.
pub struct Sas {
    secret_key: EphemeralSecret,
    public_key: Curve25519PublicKey,
}

/// A struct representing one side of a short-authentication-string
/// verification after the public keys were exchanged.
pub struct EstablishedSas {
    shared_secret: SharedSecret,
    our_public_key: Curve25519PublicKey,
    their_public_key: Curve25519PublicKey,
}

impl std::fmt::Debug for EstablishedSas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishedSas")
            .field("our_public_key", &self.our_public_key.to_base64())
            .field("their_public_key", &self.their_public_key.to_base64())
            .finish()
    }
}

impl Sas {
    /// Create a new [`Sas`] object with a fresh Curve25519 key pair.
    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    /// Create a new [`Sas`] object using the given source of randomness.
    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let secret_key = EphemeralSecret::random_from_rng(rng);
        let public_key = Curve25519PublicKey::from(&secret_key);

        Self { secret_key, public_key }
    }

    /// Get the public key that needs to be shared with the other side of the
    /// verification.
    pub const fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }

    /// Establish a SAS secret by performing a Diffie-Hellman key exchange
    /// with the public key of the other side.
    ///
    /// The `Sas` object is consumed: the ephemeral secret can be used for
    /// exactly one exchange.
    pub fn diffie_hellman(
        self,
        their_public_key: Curve25519PublicKey,
    ) -> Result<EstablishedSas, SasError> {
        let shared_secret = self.secret_key.diffie_hellman(&their_public_key.inner);

        if shared_secret.was_contributory() {
            Ok(EstablishedSas {
                shared_secret,
                our_public_key: self.public_key,
                their_public_key,
            })
        } else {
            Err(SasError::NonContributoryKey)
        }
    }

    /// Like [`Sas::diffie_hellman`], but the public key of the other side is
    /// given as an unpadded base64 string.
    pub fn diffie_hellman_with_raw(
        self,
        their_public_key: &str,
    ) -> Result<EstablishedSas, SasError> {
        let their_public_key = Curve25519PublicKey::from_base64(their_public_key)?;

        self.diffie_hellman(their_public_key)
    }
}

impl Default for Sas {
    fn default() -> Self {
        Self::new()
    }
}

impl EstablishedSas {
    /// Get our public key, the one we shared with the other side.
    pub const fn our_public_key(&self) -> Curve25519PublicKey {
        self.our_public_key
    }

    /// Get the public key of the other side.
    pub const fn their_public_key(&self) -> Curve25519PublicKey {
        self.their_public_key
    }

    /// Generate the given number of bytes using the shared secret and the
    /// given info string.
    ///
    /// The derived bytes are used to present the short authentication string
    /// to the user, commonly as a sequence of emoji or decimal numbers.
    pub fn generate_bytes(&self, info: &str, count: usize) -> Result<Vec<u8>, SasError> {
        let hkdf = self.get_hkdf();
        let mut output = vec![0u8; count];

        hkdf.expand(info.as_bytes(), &mut output)?;

        Ok(output)
    }

    /// Calculate a MAC for the given input using the given info string.
    ///
    /// The MAC key is derived from the shared secret via HKDF-SHA-256 keyed
    /// by the info string; the returned MAC is encoded as unpadded base64.
    pub fn calculate_mac(&self, input: &str, info: &str) -> String {
        let mut mac = self.get_mac(info);
        mac.update(input.as_bytes());

        base64_encode(mac.finalize().into_bytes())
    }

    /// Calculate a MAC for the given input, behaving exactly like
    /// [`EstablishedSas::calculate_mac`].
    ///
    /// This entry point exists for wire compatibility with implementations
    /// whose original `calculate_mac` emitted malformed base64 and which
    /// offer the corrected encoding under this name.
    pub fn calculate_mac_fixed_base64(&self, input: &str, info: &str) -> String {
        self.calculate_mac(input, info)
    }

    /// Calculate a MAC for the given input using an older derivation which
    /// feeds the full 256-byte HKDF expansion to HMAC as the key.
    ///
    /// This should only be used for compatibility with peers which only
    /// support the long-KDF MAC method.
    pub fn calculate_mac_long_kdf(&self, input: &str, info: &str) -> String {
        let hkdf = self.get_hkdf();
        let mut mac_key = [0u8; 256];

        hkdf.expand(info.as_bytes(), &mut mac_key)
            .expect("We should be able to expand the shared secret into a long MAC key");

        let mut mac = HmacSha256::new_from_slice(&mac_key)
            .expect("We should be able to create an HMAC object from a 256-byte key");
        mac.update(input.as_bytes());

        mac_key.zeroize();

        base64_encode(mac.finalize().into_bytes())
    }

    /// Verify, in constant time, that the given base64-encoded MAC
    /// authenticates the given input under the given info string.
    ///
    /// The MAC needs to have been created with
    /// [`EstablishedSas::calculate_mac`], using the same input and info.
    pub fn verify_mac(&self, input: &str, info: &str, tag: &str) -> Result<(), SasError> {
        let tag = base64_decode(tag)?;

        let mut mac = self.get_mac(info);
        mac.update(input.as_bytes());

        Ok(mac.verify_slice(&tag)?)
    }

    fn get_hkdf(&self) -> Hkdf<Sha256> {
        Hkdf::new(None, self.shared_secret.as_bytes())
    }

    fn get_mac(&self, info: &str) -> HmacSha256 {
        let hkdf = self.get_hkdf();
        let mut mac_key = [0u8; 32];

        hkdf.expand(info.as_bytes(), &mut mac_key)
            .expect("We should be able to expand the shared secret into a MAC key");

        let mac = HmacSha256::new_from_slice(&mac_key)
            .expect("We should be able to create an HMAC object from a 32-byte key");

        mac_key.zeroize();

        mac
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{Sas, SasError};
    use crate::Curve25519PublicKey;

    fn established_pair() -> (super::EstablishedSas, super::EstablishedSas) {
        let alice = Sas::new();
        let bob = Sas::new();

        let alice_public_key = alice.public_key();
        let bob_public_key = bob.public_key();

        let alice_established =
            alice.diffie_hellman(bob_public_key).expect("Both sides generated real keys");
        let bob_established =
            bob.diffie_hellman(alice_public_key).expect("Both sides generated real keys");

        (alice_established, bob_established)
    }

    #[test]
    fn bytes_generation_is_symmetric() {
        let (alice, bob) = established_pair();

        assert_eq!(
            alice
                .generate_bytes("MATRIX_KEY_VERIFICATION_SAS", 5)
                .expect("Five bytes should be derivable"),
            bob.generate_bytes("MATRIX_KEY_VERIFICATION_SAS", 5)
                .expect("Five bytes should be derivable")
        );

        assert_ne!(
            alice.generate_bytes("FIRST_INFO", 5).expect("Five bytes should be derivable"),
            bob.generate_bytes("SECOND_INFO", 5).expect("Five bytes should be derivable"),
            "Different info strings should derive different byte strings"
        );
    }

    #[test]
    fn macs_agree_and_verify() {
        let (alice, bob) = established_pair();

        let input = "It's a secret to everybody";
        let info = "MATRIX_KEY_VERIFICATION_MAC";

        let alice_mac = alice.calculate_mac(input, info);
        let bob_mac = bob.calculate_mac(input, info);

        assert_eq!(alice_mac, bob_mac);
        assert_eq!(alice_mac, alice.calculate_mac_fixed_base64(input, info));

        bob.verify_mac(input, info, &alice_mac).expect("The MAC of the other side should verify");

        assert_matches!(
            bob.verify_mac("A different input", info, &alice_mac),
            Err(SasError::Mac(_))
        );
    }

    #[test]
    fn long_kdf_macs_agree_but_differ_from_the_short_ones() {
        let (alice, bob) = established_pair();

        let input = "It's a secret to everybody";
        let info = "MATRIX_KEY_VERIFICATION_MAC";

        assert_eq!(alice.calculate_mac_long_kdf(input, info), bob.calculate_mac_long_kdf(input, info));
        assert_ne!(alice.calculate_mac_long_kdf(input, info), alice.calculate_mac(input, info));
    }

    #[test]
    fn low_order_keys_are_rejected() {
        let sas = Sas::new();
        let low_order_key = Curve25519PublicKey::from_bytes([0u8; 32]);

        assert_matches!(sas.diffie_hellman(low_order_key), Err(SasError::NonContributoryKey));
    }

    #[test]
    fn raw_public_keys_establish() {
        let alice = Sas::new();
        let bob = Sas::new();

        let alice_public_key = alice.public_key().to_base64();
        let bob_public_key = bob.public_key().to_base64();

        let alice_established = alice
            .diffie_hellman_with_raw(&bob_public_key)
            .expect("A base64 public key should establish");
        let bob_established = bob
            .diffie_hellman_with_raw(&alice_public_key)
            .expect("A base64 public key should establish");

        assert_eq!(
            alice_established.generate_bytes("SAS", 6).expect("Six bytes should be derivable"),
            bob_established.generate_bytes("SAS", 6).expect("Six bytes should be derivable")
        );
    }
}
