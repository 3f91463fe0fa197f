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

#![deny(
    clippy::mem_forget,
    clippy::unwrap_used,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    rust_2018_idioms
)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod cipher;
mod types;
mod utilities;

pub mod megolm;
pub mod olm;
pub mod pk_encryption;
pub mod pk_signing;
pub mod sas;

pub use base64::DecodeError as Base64DecodeError;
pub use prost::DecodeError as ProtoBufDecodeError;
pub use types::{
    Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair, Ed25519PublicKey, Ed25519SecretKey,
    Ed25519Signature, KeyError, KeyId, SignatureError,
};
pub use utilities::{base64_decode, base64_encode, sha256, PickleDecodeError};

/// Error type describing the various ways a pickle can fail to be decoded.
#[derive(Debug, thiserror::Error)]
pub enum PickleError {
    /// The pickle wasn't valid base64.
    #[error("The pickle wasn't valid base64: {0}")]
    Base64(#[from] Base64DecodeError),
    /// The pickle is too short to contain the version prefix, the MAC, and at
    /// least one block of ciphertext.
    #[error("The pickle was too short to be valid, got {0} bytes")]
    InvalidLength(usize),
    /// The encrypted pickle could not be decrypted, either the MAC check or
    /// the padding check failed. This usually means that a wrong pickle key
    /// was used.
    #[error("The pickle couldn't be decrypted: {0}")]
    Decryption(#[from] crate::cipher::DecryptionError),
    /// The pickle has a version which isn't in the accepted set for the
    /// object class.
    #[error("The pickle uses the unsupported version {0}")]
    Version(u32),
    /// The payload of the pickle could not be decoded.
    #[error(transparent)]
    Decode(#[from] PickleDecodeError),
    /// The pickle contained an invalid public key.
    #[error("The pickle contained an invalid public key: {0}")]
    PublicKey(#[from] KeyError),
    /// The pickle uses the legacy account layout but failed its validity
    /// checks, the stored public keys don't match the secret ones.
    #[error("The legacy account pickle failed its validity checks")]
    InvalidLegacyAccount,
    /// The pickle does not contain a valid receiving or sending chain. A
    /// valid Olm session needs to have at least one of them.
    #[error("The pickle didn't contain a valid Olm session")]
    InvalidSession,
}

/// Error type describing the different ways message decoding can fail.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The Olm message has an invalid type.
    #[error("The message has an invalid type, expected 0 or 1, got {0}")]
    MessageType(usize),
    /// The message is missing a valid version.
    #[error("The message didn't contain a version")]
    MissingVersion,
    /// The message doesn't have enough data to be correctly decoded.
    #[error("The message was too short, it didn't contain a valid payload, got {0} bytes")]
    MessageTooShort(usize),
    /// The message has a unsupported version.
    #[error("The message didn't have a valid version, expected {0}, got {1}")]
    InvalidVersion(u8, u8),
    /// An embedded public key couldn't be decoded.
    #[error("The message contained an invalid public key: {0}")]
    InvalidKey(#[from] KeyError),
    /// An embedded signature couldn't be decoded.
    #[error("The message contained an invalid signature: {0}")]
    Signature(#[from] SignatureError),
    /// The message couldn't be decoded as a valid protocol buffer message.
    #[error(transparent)]
    ProtoBufError(#[from] ProtoBufDecodeError),
    /// The message wasn't valid base64.
    #[error("The message wasn't valid base64: {0}")]
    Base64(#[from] Base64DecodeError),
}

/// The version of this library, as a `(major, minor, patch)` triple.
pub fn get_library_version() -> (u8, u8, u8) {
    const fn parse(version: &str) -> u8 {
        let bytes = version.as_bytes();
        let mut value = 0u8;
        let mut i = 0;

        while i < bytes.len() {
            value = value * 10 + (bytes[i] - b'0');
            i += 1;
        }

        value
    }

    const MAJOR: u8 = parse(env!("CARGO_PKG_VERSION_MAJOR"));
    const MINOR: u8 = parse(env!("CARGO_PKG_VERSION_MINOR"));
    const PATCH: u8 = parse(env!("CARGO_PKG_VERSION_PATCH"));

    (MAJOR, MINOR, PATCH)
}

#[cfg(test)]
mod test {
    #[test]
    fn library_version_matches_the_manifest() {
        let (major, minor, patch) = super::get_library_version();

        assert_eq!(format!("{major}.{minor}.{patch}"), env!("CARGO_PKG_VERSION"));
    }
}
