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

//! Sealed-box style public-key encryption.
//!
//! This is a hybrid encryption scheme utilizing Curve25519 and AES-CBC.
//! X25519 ECDH is performed between an ephemeral key pair and a long-lived
//! key pair to establish a shared secret, from which symmetric encryption
//! and message authentication (MAC) keys are derived.
//!
//! # Examples
//!
//! ```
//! use anyhow::Result;
//! use salamander::pk_encryption::{PkDecryption, PkEncryption};
//!
//! fn main() -> Result<()> {
//!     let plaintext = b"It's a secret to everybody";
//!
//!     let decryption = PkDecryption::new();
//!     let encryption = PkEncryption::from_key(decryption.public_key());
//!
//!     let message = encryption.encrypt(plaintext);
//!     let decrypted = decryption.decrypt(&message)?;
//!
//!     assert_eq!(decrypted.as_slice(), plaintext);
//!
//!     Ok(())
//! }
//! ```

use aes::cipher::block_padding::UnpadError;
use hmac::digest::MacError;
use rand::{thread_rng, CryptoRng, RngCore};
use thiserror::Error;
use zeroize::Zeroize;

use crate::{
    base64_decode,
    cipher::Cipher,
    utilities::{ensure_fully_consumed, open_pickle, seal_pickle, DecodeSecret},
    Curve25519PublicKey, Curve25519SecretKey, KeyError, PickleError,
};

const PICKLE_VERSION: u32 = 1;

/// An error type describing failures which can happen during the decryption
/// step.
#[derive(Debug, Error)]
pub enum Error {
    /// The message has invalid PKCS#7 padding.
    #[error("Failed to decrypt, invalid padding")]
    InvalidPadding(#[from] UnpadError),
    /// The message failed to be authenticated.
    #[error("The MAC of the ciphertext didn't pass validation: {0}")]
    Mac(#[from] MacError),
}

/// An error type describing failures which can happen during the decoding of
/// an encrypted [`Message`].
#[derive(Debug, Error)]
pub enum MessageDecodeError {
    /// One of the message parts wasn't valid base64.
    #[error(transparent)]
    Base64(#[from] crate::Base64DecodeError),
    /// The ephemeral Curve25519 key isn't valid.
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// A message that was encrypted using a [`PkEncryption`] object.
#[derive(Debug)]
pub struct Message {
    /// The ciphertext of the message.
    pub ciphertext: Vec<u8>,
    /// The truncated message authentication code of the ciphertext.
    pub mac: Vec<u8>,
    /// The ephemeral [`Curve25519PublicKey`] used to derive the individual
    /// message key.
    pub ephemeral_key: Curve25519PublicKey,
}

impl Message {
    /// Attempt to decode a [`Message`] from a base64-encoded triplet of
    /// ciphertext, MAC, and ephemeral key.
    pub fn from_base64(
        ciphertext: &str,
        mac: &str,
        ephemeral_key: &str,
    ) -> Result<Self, MessageDecodeError> {
        Ok(Self {
            ciphertext: base64_decode(ciphertext)?,
            mac: base64_decode(mac)?,
            ephemeral_key: Curve25519PublicKey::from_base64(ephemeral_key)?,
        })
    }

    /// Encode the [`Message`] as a base64-encoded triplet of ciphertext,
    /// MAC, and ephemeral key.
    pub fn to_base64(&self) -> (String, String, String) {
        (
            crate::base64_encode(&self.ciphertext),
            crate::base64_encode(&self.mac),
            self.ephemeral_key.to_base64(),
        )
    }
}

/// The decryption half of the sealed-box encryption support.
///
/// The public key can be shared with others, allowing them to encrypt
/// messages which can be decrypted using the corresponding private key.
pub struct PkDecryption {
    secret_key: Curve25519SecretKey,
    public_key: Curve25519PublicKey,
}

impl std::fmt::Debug for PkDecryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkDecryption").finish_non_exhaustive()
    }
}

impl PkDecryption {
    /// Create a new random [`PkDecryption`] object.
    ///
    /// This contains a fresh [`Curve25519SecretKey`] which is used as a
    /// long-term key to derive individual message keys and effectively
    /// serves as the decryption secret.
    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    /// Create a new [`PkDecryption`] object using the given source of
    /// randomness.
    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self::from_key(Curve25519SecretKey::new_from_rng(rng))
    }

    /// Create a [`PkDecryption`] object from a [`Curve25519SecretKey`].
    ///
    /// The [`Curve25519SecretKey`] will be used as the long-term key to
    /// derive individual message keys.
    pub fn from_key(secret_key: Curve25519SecretKey) -> Self {
        let public_key = Curve25519PublicKey::from(&secret_key);
        Self { secret_key, public_key }
    }

    /// Get the [`Curve25519SecretKey`] of this [`PkDecryption`] object.
    ///
    /// If persistence is required, securely serialize and store this key. It
    /// can be used to reconstruct the [`PkDecryption`] object for decrypting
    /// associated messages.
    pub const fn secret_key(&self) -> &Curve25519SecretKey {
        &self.secret_key
    }

    /// Get the associated [`Curve25519PublicKey`]. This key can be used to
    /// construct a [`PkEncryption`] object to encrypt messages for this
    /// object.
    pub const fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }

    /// Decrypt a [`Message`] which was encrypted for this [`PkDecryption`]
    /// object.
    ///
    /// The MAC of the ciphertext gets verified before any plaintext is
    /// produced.
    pub fn decrypt(&self, message: &Message) -> Result<Vec<u8>, Error> {
        let shared_secret = self.secret_key.diffie_hellman(&message.ephemeral_key);
        let cipher = Cipher::new(shared_secret.as_bytes());

        cipher.verify_truncated_mac(&message.ciphertext, &message.mac)?;

        Ok(cipher.decrypt(&message.ciphertext)?)
    }

    /// Pickle the object, producing an encrypted, authenticated and
    /// base64-encoded serialization of the secret key under the given pickle
    /// key.
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        let mut payload = self.secret_key.to_bytes();
        let ret = seal_pickle(&payload, pickle_key, PICKLE_VERSION);

        payload.zeroize();

        ret
    }

    /// Restore a [`PkDecryption`] object from a pickle, given the key it was
    /// pickled with.
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        let (version, mut payload) = open_pickle(pickle, pickle_key)?;

        let result = match version {
            PICKLE_VERSION => {
                let mut cursor = std::io::Cursor::new(payload.as_slice());

                let decoded = <[u8; 32]>::decode_secret(&mut cursor)
                    .and_then(|key_bytes| ensure_fully_consumed(&mut cursor).map(|_| key_bytes));

                match decoded {
                    Ok(mut key_bytes) => {
                        let ret = Self::from_key(Curve25519SecretKey::from_slice(&key_bytes));
                        key_bytes.zeroize();

                        Ok(ret)
                    }
                    Err(e) => Err(PickleError::from(e)),
                }
            }
            _ => Err(PickleError::Version(version)),
        };

        payload.zeroize();

        result
    }
}

impl Default for PkDecryption {
    fn default() -> Self {
        Self::new()
    }
}

/// The encryption half of the sealed-box encryption support.
///
/// This struct can be created from a [`Curve25519PublicKey`] corresponding
/// to a [`PkDecryption`] object, allowing encryption of messages for that
/// object.
pub struct PkEncryption {
    public_key: Curve25519PublicKey,
}

impl PkEncryption {
    /// Create a new [`PkEncryption`] object from a [`Curve25519PublicKey`].
    ///
    /// The public key should be obtained from an existing [`PkDecryption`]
    /// object.
    pub const fn from_key(public_key: Curve25519PublicKey) -> Self {
        Self { public_key }
    }

    /// Encrypt a message using this [`PkEncryption`] object.
    pub fn encrypt(&self, message: &[u8]) -> Message {
        let ephemeral_key = Curve25519SecretKey::new();
        let shared_secret = ephemeral_key.diffie_hellman(&self.public_key);

        let cipher = Cipher::new(shared_secret.as_bytes());

        let ciphertext = cipher.encrypt(message);
        let mac = cipher.mac(&ciphertext).truncate().to_vec();

        Message { ciphertext, mac, ephemeral_key: Curve25519PublicKey::from(&ephemeral_key) }
    }
}

impl From<&PkDecryption> for PkEncryption {
    fn from(value: &PkDecryption) -> Self {
        Self::from_key(value.public_key())
    }
}

impl From<Curve25519PublicKey> for PkEncryption {
    fn from(public_key: Curve25519PublicKey) -> Self {
        Self { public_key }
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{Error, Message, PkDecryption, PkEncryption};
    use crate::{base64_encode, PickleError};

    #[test]
    fn encryption_round_trip() {
        let decryptor = PkDecryption::new();
        let encryptor = PkEncryption::from_key(decryptor.public_key());

        let message = "It's a secret to everybody";

        let encrypted = encryptor.encrypt(message.as_ref());
        let decrypted = decryptor
            .decrypt(&encrypted)
            .expect("We should be able to decrypt a message we encrypted");

        assert_eq!(message.as_bytes(), decrypted);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let decryptor = PkDecryption::new();
        let encryptor = PkEncryption::from_key(decryptor.public_key());

        let mut encrypted = encryptor.encrypt(b"It's a secret to everybody");
        encrypted.ciphertext[0] ^= 0b1;

        assert_matches!(decryptor.decrypt(&encrypted), Err(Error::Mac(_)));
    }

    #[test]
    fn base64_transport_round_trip() {
        let decryptor = PkDecryption::new();
        let encryptor = PkEncryption::from_key(decryptor.public_key());

        let encrypted = encryptor.encrypt(b"It's a secret to everybody");
        let (ciphertext, mac, ephemeral_key) = encrypted.to_base64();

        assert_eq!(ciphertext, base64_encode(&encrypted.ciphertext));

        let decoded = Message::from_base64(&ciphertext, &mac, &ephemeral_key)
            .expect("A message we encoded should decode");
        let decrypted =
            decryptor.decrypt(&decoded).expect("The transported message should decrypt");

        assert_eq!(decrypted, b"It's a secret to everybody");
    }

    #[test]
    fn pickle_round_trip() {
        let decryptor = PkDecryption::new();
        let pickle = decryptor.pickle(b"A pickle key");

        let unpickled = PkDecryption::from_pickle(&pickle, b"A pickle key")
            .expect("Our own pickle should unpickle");

        assert_eq!(decryptor.public_key(), unpickled.public_key());

        assert_matches!(
            PkDecryption::from_pickle(&pickle, b"Not the pickle key"),
            Err(PickleError::Decryption(_))
        );
    }
}
