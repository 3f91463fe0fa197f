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

//! The encrypted pickle format.
//!
//! A pickle is the base64 encoding of
//!
//! ```text
//! +---------+----------------------+----------------+
//! | Version | AES-CBC ciphertext   | truncated MAC  |
//! +---------+----------------------+----------------+
//! 0         4                      N               N+8   bytes
//! ```
//!
//! The version is a big-endian u32 which is specific to the object class
//! that was pickled. The AES key, the MAC key, and the IV are derived from
//! the caller-supplied pickle key using HKDF-SHA-256 with an empty salt and
//! empty info. The MAC is the first 8 bytes of HMAC-SHA-256 over the version
//! and the ciphertext.
//!
//! The decrypted payload is a typed sequence of fields whose order and
//! layout are dictated by the object class and the pickle version: integers
//! are fixed-size big-endian, byte arrays are raw, and lists are prefixed
//! with a u32 element count. The [`Encode`] and [`Decode`] traits below
//! implement this field encoding.

use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zeroize::Zeroize;

use super::{base64_decode, base64_encode};
use crate::{
    cipher::{Cipher, DecryptionError, Mac},
    PickleError,
};

/// Error type describing failure modes of pickle payload decoding.
#[derive(Debug, Error)]
pub enum PickleDecodeError {
    /// There was an error while reading from the pickle payload, usually not
    /// enough data was provided.
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// The encoded value doesn't fit into the usize of the architecture that
    /// is decoding.
    #[error("The decoded value {0} does not fit into the usize type of this architecture")]
    OutsideUsizeRange(u64),
}

/// Encrypt and authenticate the encoded pickle payload with the given pickle
/// key, framing it with the given pickle version.
pub(crate) fn seal_pickle(payload: &[u8], pickle_key: &[u8], version: u32) -> String {
    let cipher = Cipher::new_pickle(pickle_key);

    let mut pickle = Vec::with_capacity(payload.len() + 32);
    pickle.extend_from_slice(&version.to_be_bytes());
    pickle.extend_from_slice(&cipher.encrypt(payload));

    let mac = cipher.mac(&pickle);
    pickle.extend_from_slice(&mac.truncate());

    base64_encode(pickle)
}

/// Authenticate and decrypt the given pickle, returning the pickle version
/// and the decoded payload.
///
/// The MAC is checked in constant time before any decryption happens. The
/// caller is responsible for dispatching on the version and zeroizing the
/// payload.
pub(crate) fn open_pickle(pickle: &str, pickle_key: &[u8]) -> Result<(u32, Vec<u8>), PickleError> {
    const MIN_PICKLE_LENGTH: usize = 4 + 16 + Mac::TRUNCATED_LEN;

    let decoded = base64_decode(pickle)?;

    if decoded.len() < MIN_PICKLE_LENGTH {
        return Err(PickleError::InvalidLength(decoded.len()));
    }

    let (authenticated, mac) = decoded.split_at(decoded.len() - Mac::TRUNCATED_LEN);

    let cipher = Cipher::new_pickle(pickle_key);
    cipher.verify_truncated_mac(authenticated, mac).map_err(DecryptionError::from)?;

    let (version, ciphertext) = authenticated.split_at(4);
    let version =
        u32::from_be_bytes(version.try_into().expect("We split off exactly four version bytes"));

    let payload = cipher.decrypt(ciphertext).map_err(DecryptionError::from)?;

    Ok((version, payload))
}

/// Ensure that the given reader has been fully consumed, i.e. that a decoded
/// pickle payload contained no trailing data.
pub(crate) fn ensure_fully_consumed(reader: &mut impl Read) -> Result<(), PickleDecodeError> {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;

    if rest.is_empty() {
        Ok(())
    } else {
        rest.zeroize();

        Err(PickleDecodeError::IO(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "The pickle contained trailing data",
        )))
    }
}

/// A trait for encoding values into the typed field format of a pickle
/// payload.
pub(crate) trait Encode {
    /// Encode the value into the given writer.
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error>;

    /// Encode the value into a fresh byte buffer.
    ///
    /// **Warning**: If the value contains secret material the caller needs to
    /// zeroize the returned buffer.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buffer = Vec::new();

        self.encode(&mut buffer).expect("Writing into a Vec never fails");

        buffer
    }
}

/// A trait for decoding non-secret values out of a pickle payload.
///
/// For decoding values which are meant to be secret, see [`DecodeSecret`].
pub(crate) trait Decode {
    /// Try to read and decode a non-secret value from the given reader.
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError>
    where
        Self: Sized;

    /// Try to decode a non-secret value from the given byte slice, which must
    /// be consumed completely.
    fn decode_from_slice(buffer: &[u8]) -> Result<Self, PickleDecodeError>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(buffer);
        let ret = Self::decode(&mut cursor)?;

        ensure_fully_consumed(&mut cursor)?;

        Ok(ret)
    }
}

/// Like [`Decode`], but for decoding secret values.
///
/// Unlike [`Decode`], this trait allocates the buffer for the target value on
/// the heap and returns it in a `Box`. This reduces the number of inadvertent
/// copies made when the value is moved, allowing the value to be properly
/// zeroized.
pub(crate) trait DecodeSecret {
    /// Try to read and decode a secret value from the given reader.
    fn decode_secret(reader: &mut impl Read) -> Result<Box<Self>, PickleDecodeError>
    where
        Self: Sized;
}

impl Encode for u8 {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(&[*self])
    }
}

impl Decode for u8 {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let mut buffer = [0u8; 1];

        reader.read_exact(&mut buffer)?;

        Ok(buffer[0])
    }
}

impl Encode for bool {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        u8::from(*self).encode(writer)
    }
}

impl Decode for bool {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let value = u8::decode(reader)?;

        Ok(value != 0)
    }
}

impl Encode for u32 {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(&self.to_be_bytes())
    }
}

impl Decode for u32 {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let mut buffer = [0u8; 4];
        reader.read_exact(&mut buffer)?;

        Ok(u32::from_be_bytes(buffer))
    }
}

impl Encode for usize {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        let value: u32 = (*self).try_into().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "The length does not fit into a u32",
            )
        })?;

        value.encode(writer)
    }
}

impl Decode for usize {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let size = u32::decode(reader)?;

        size.try_into().map_err(|_| PickleDecodeError::OutsideUsizeRange(size.into()))
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(self.as_ref())
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let mut buffer = [0u8; N];
        reader.read_exact(&mut buffer)?;

        Ok(buffer)
    }
}

impl<const N: usize> DecodeSecret for [u8; N] {
    fn decode_secret(reader: &mut impl Read) -> Result<Box<Self>, PickleDecodeError> {
        let mut buffer = Box::new([0u8; N]);
        reader.read_exact(buffer.as_mut_slice())?;

        Ok(buffer)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.len().encode(writer)?;

        for element in self {
            element.encode(writer)?;
        }

        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let length = usize::decode(reader)?;

        let mut buffer = Vec::new();

        for _ in 0..length {
            let element = T::decode(reader)?;
            buffer.push(element);
        }

        Ok(buffer)
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{open_pickle, seal_pickle, Decode, Encode};
    use crate::{cipher::DecryptionError, PickleError};

    const PICKLE_KEY: &[u8; 32] = &[0u8; 32];

    #[test]
    fn field_encoding_round_trip() {
        let mut buffer = Vec::new();

        42u32.encode(&mut buffer).expect("Writing into a Vec never fails");
        true.encode(&mut buffer).expect("Writing into a Vec never fails");
        [1u8; 32].encode(&mut buffer).expect("Writing into a Vec never fails");
        vec![7u32, 8, 9].encode(&mut buffer).expect("Writing into a Vec never fails");

        let mut cursor = std::io::Cursor::new(&buffer);

        assert_eq!(u32::decode(&mut cursor).expect("An u32 should decode"), 42);
        assert!(bool::decode(&mut cursor).expect("A bool should decode"));
        assert_eq!(<[u8; 32]>::decode(&mut cursor).expect("An array should decode"), [1u8; 32]);
        assert_eq!(Vec::<u32>::decode(&mut cursor).expect("A list should decode"), [7, 8, 9]);
    }

    #[test]
    fn envelope_round_trip() {
        let payload = b"some very important state";

        let pickle = seal_pickle(payload, PICKLE_KEY, 4);
        let (version, decrypted) = open_pickle(&pickle, PICKLE_KEY).expect("The pickle is valid");

        assert_eq!(version, 4);
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn wrong_key_fails_the_mac_check() {
        let pickle = seal_pickle(b"state", PICKLE_KEY, 1);

        assert_matches!(
            open_pickle(&pickle, b"wrong key"),
            Err(PickleError::Decryption(DecryptionError::Mac(_)))
        );
    }

    #[test]
    fn every_flipped_bit_is_detected() {
        let pickle = seal_pickle(b"state", PICKLE_KEY, 1);
        let decoded = crate::utilities::base64_decode(&pickle).expect("Our pickle is valid base64");

        for i in 0..decoded.len() * 8 {
            let mut tampered = decoded.clone();
            tampered[i / 8] ^= 1 << (i % 8);

            let tampered = crate::utilities::base64_encode(tampered);

            assert_matches!(
                open_pickle(&tampered, PICKLE_KEY),
                Err(PickleError::Decryption(DecryptionError::Mac(_)))
            );
        }
    }

    #[test]
    fn truncated_pickle_is_rejected() {
        assert_matches!(
            open_pickle(&crate::utilities::base64_encode([0u8; 12]), PICKLE_KEY),
            Err(PickleError::InvalidLength(12))
        );
    }
}
