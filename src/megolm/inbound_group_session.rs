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

use std::io::{Read, Write};

use aes::cipher::block_padding::UnpadError;
use hmac::digest::MacError;
use thiserror::Error;
use zeroize::Zeroize;

use super::{
    message::MegolmMessage,
    ratchet::Ratchet,
    session_keys::{ExportedSessionKey, SessionKey},
    GroupSession,
};
use crate::{
    cipher::Cipher,
    utilities::{
        ensure_fully_consumed, open_pickle, seal_pickle, Decode, DecodeSecret, Encode,
        PickleDecodeError,
    },
    Ed25519PublicKey, PickleError, SignatureError,
};

const PICKLE_VERSION: u32 = 2;
const PICKLE_VERSION_NO_VERIFIED_FLAG: u32 = 1;

/// Error type describing the failure modes of Megolm message decryption.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// The signature on the message was invalid.
    #[error("The signature on the message was invalid: {0}")]
    Signature(#[from] SignatureError),
    /// The MAC of the message failed to validate.
    #[error("Failed decrypting Megolm message, invalid MAC: {0}")]
    InvalidMAC(#[from] MacError),
    /// The ciphertext had invalid padding.
    #[error("Failed decrypting Megolm message, invalid ciphertext padding")]
    InvalidCiphertext(#[from] UnpadError),
    /// The message was encrypted with a ratchet index lower than the first
    /// one this receiver knows.
    #[error(
        "The message was encrypted using an unknown message index, \
        first known index {0}, index of the message {1}"
    )]
    UnknownMessageIndex(u32, u32),
}

/// The receiving half of a Megolm group session.
///
/// Contains the ratchet state at the earliest known index and the public
/// part of the sender's signing key, but no secret signing material: an
/// inbound group session can decrypt and authenticate messages, never
/// produce them.
pub struct InboundGroupSession {
    initial_ratchet: Ratchet,
    latest_ratchet: Ratchet,
    signing_key: Ed25519PublicKey,
    /// Was the signing key authenticated by the signature of a full session
    /// key? Sessions created from an unsigned export can never be promoted
    /// back to verified.
    signing_key_verified: bool,
}

/// The result of a successful decryption of a [`MegolmMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// The decrypted plaintext of the message.
    pub plaintext: Vec<u8>,
    /// The ratchet index at which the message was encrypted.
    pub message_index: u32,
}

impl InboundGroupSession {
    /// Create a new `InboundGroupSession` from a signed [`SessionKey`],
    /// usually received from the sending side over a secure channel.
    pub fn new(session_key: &SessionKey) -> Self {
        let initial_ratchet = Ratchet::from_bytes(
            *session_key.session_key.ratchet,
            session_key.session_key.ratchet_index,
        );
        let latest_ratchet = initial_ratchet.clone();

        // The signature was verified when the `SessionKey` was decoded.
        Self {
            initial_ratchet,
            latest_ratchet,
            signing_key: session_key.session_key.signing_key,
            signing_key_verified: true,
        }
    }

    /// Create a new `InboundGroupSession` from an unsigned
    /// [`ExportedSessionKey`], the re-sharing format produced by
    /// [`InboundGroupSession::export_at`].
    pub fn import(exported_session_key: &ExportedSessionKey) -> Self {
        let initial_ratchet = Ratchet::from_bytes(
            *exported_session_key.ratchet,
            exported_session_key.ratchet_index,
        );
        let latest_ratchet = initial_ratchet.clone();

        Self {
            initial_ratchet,
            latest_ratchet,
            signing_key: exported_session_key.signing_key,
            signing_key_verified: false,
        }
    }

    /// Returns the globally unique session ID, in base64-encoded form.
    pub fn session_id(&self) -> String {
        self.signing_key.to_base64()
    }

    /// The first message index this session can decrypt.
    pub const fn first_known_index(&self) -> u32 {
        self.initial_ratchet.index()
    }

    /// Permanently advance the session to the given index.
    ///
    /// This removes the ability to decrypt messages that were encrypted with
    /// a lower message index than the given one.
    ///
    /// Returns true if the ratchet has been advanced, false if the ratchet
    /// was already advanced past the given index.
    pub fn advance_to(&mut self, index: u32) -> bool {
        if self.first_known_index() < index {
            self.initial_ratchet.advance_to(index);

            if self.latest_ratchet.index() < index {
                self.latest_ratchet = self.initial_ratchet.clone();
            }

            true
        } else {
            false
        }
    }

    fn find_ratchet(&mut self, message_index: u32) -> Option<&Ratchet> {
        if self.initial_ratchet.index() == message_index {
            Some(&self.initial_ratchet)
        } else if self.latest_ratchet.index() == message_index {
            Some(&self.latest_ratchet)
        } else if self.latest_ratchet.index() < message_index {
            self.latest_ratchet.advance_to(message_index);
            Some(&self.latest_ratchet)
        } else if self.initial_ratchet.index() < message_index {
            self.latest_ratchet = self.initial_ratchet.clone();
            self.latest_ratchet.advance_to(message_index);
            Some(&self.latest_ratchet)
        } else {
            None
        }
    }

    /// Decrypt the given [`MegolmMessage`].
    ///
    /// The signature is verified against the session's signing key and the
    /// MAC against the per-index message key before any plaintext is
    /// produced.
    pub fn decrypt(
        &mut self,
        message: &MegolmMessage,
    ) -> Result<DecryptedMessage, DecryptionError> {
        self.signing_key.verify(&message.to_signature_bytes(), &message.signature)?;

        if let Some(ratchet) = self.find_ratchet(message.message_index) {
            let cipher = Cipher::new_megolm(ratchet.as_bytes());

            cipher.verify_truncated_mac(&message.to_mac_bytes(), &message.mac)?;
            let plaintext = cipher.decrypt(&message.ciphertext)?;

            Ok(DecryptedMessage { plaintext, message_index: message.message_index })
        } else {
            Err(DecryptionError::UnknownMessageIndex(
                self.initial_ratchet.index(),
                message.message_index,
            ))
        }
    }

    /// Export the session state at the given message index.
    ///
    /// Returns `None` if the given index is lower than the session's first
    /// known index.
    ///
    /// An inbound group session created from such an export can decrypt
    /// messages starting from the given index, but is not marked as
    /// verified.
    pub fn export_at(&mut self, index: u32) -> Option<ExportedSessionKey> {
        let signing_key = self.signing_key;

        self.find_ratchet(index).map(|ratchet| ExportedSessionKey::new(ratchet, signing_key))
    }

    /// Pickle the session, producing an encrypted, authenticated and
    /// base64-encoded serialization of its state under the given key.
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        let pickle = InboundGroupSessionPickle::from(self);
        let mut payload = pickle.encode_to_vec();

        let ret = seal_pickle(&payload, pickle_key, PICKLE_VERSION);

        payload.zeroize();

        ret
    }

    /// Restore an [`InboundGroupSession`] from a pickle, given the key it
    /// was pickled with.
    ///
    /// Every historically produced pickle version is accepted; pickles
    /// always get written using the newest version.
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        let (version, mut payload) = open_pickle(pickle, pickle_key)?;

        let result = match version {
            PICKLE_VERSION | PICKLE_VERSION_NO_VERIFIED_FLAG => {
                let mut cursor = std::io::Cursor::new(payload.as_slice());
                let pickle = InboundGroupSessionPickle::decode_with_version(&mut cursor, version);

                pickle
                    .and_then(|p| ensure_fully_consumed(&mut cursor).map(|_| p))
                    .map_err(PickleError::from)
            }
            _ => Err(PickleError::Version(version)),
        };

        payload.zeroize();

        result?.try_into()
    }
}

impl From<&GroupSession> for InboundGroupSession {
    fn from(session: &GroupSession) -> Self {
        Self {
            initial_ratchet: session.ratchet().clone(),
            latest_ratchet: session.ratchet().clone(),
            signing_key: session.signing_key().public_key(),
            signing_key_verified: true,
        }
    }
}

struct RatchetPickle {
    ratchet: Box<[u8; Ratchet::RATCHET_LENGTH]>,
    index: u32,
}

impl Drop for RatchetPickle {
    fn drop(&mut self) {
        self.ratchet.zeroize();
    }
}

impl From<&Ratchet> for RatchetPickle {
    fn from(ratchet: &Ratchet) -> Self {
        Self { ratchet: Box::new(*ratchet.as_bytes()), index: ratchet.index() }
    }
}

impl From<&RatchetPickle> for Ratchet {
    fn from(pickle: &RatchetPickle) -> Self {
        Ratchet::from_bytes(*pickle.ratchet, pickle.index)
    }
}

impl Encode for RatchetPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet.as_ref().encode(writer)?;
        self.index.encode(writer)
    }
}

impl Decode for RatchetPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            ratchet: <[u8; Ratchet::RATCHET_LENGTH]>::decode_secret(reader)?,
            index: u32::decode(reader)?,
        })
    }
}

struct InboundGroupSessionPickle {
    initial_ratchet: RatchetPickle,
    latest_ratchet: RatchetPickle,
    signing_key: [u8; 32],
    signing_key_verified: bool,
}

impl Encode for InboundGroupSessionPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.initial_ratchet.encode(writer)?;
        self.latest_ratchet.encode(writer)?;
        self.signing_key.encode(writer)?;
        self.signing_key_verified.encode(writer)
    }
}

impl InboundGroupSessionPickle {
    fn decode_with_version(
        reader: &mut impl Read,
        version: u32,
    ) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            initial_ratchet: RatchetPickle::decode(reader)?,
            latest_ratchet: RatchetPickle::decode(reader)?,
            signing_key: <[u8; 32]>::decode(reader)?,
            // The verified flag was introduced with the second pickle
            // version; older pickles could only be created from a signed
            // session key.
            signing_key_verified: if version >= PICKLE_VERSION {
                bool::decode(reader)?
            } else {
                true
            },
        })
    }
}

impl From<&InboundGroupSession> for InboundGroupSessionPickle {
    fn from(session: &InboundGroupSession) -> Self {
        Self {
            initial_ratchet: (&session.initial_ratchet).into(),
            latest_ratchet: (&session.latest_ratchet).into(),
            signing_key: *session.signing_key.as_bytes(),
            signing_key_verified: session.signing_key_verified,
        }
    }
}

impl TryFrom<InboundGroupSessionPickle> for InboundGroupSession {
    type Error = PickleError;

    fn try_from(pickle: InboundGroupSessionPickle) -> Result<Self, Self::Error> {
        Ok(Self {
            initial_ratchet: (&pickle.initial_ratchet).into(),
            latest_ratchet: (&pickle.latest_ratchet).into(),
            signing_key: Ed25519PublicKey::from_slice(&pickle.signing_key)?,
            signing_key_verified: pickle.signing_key_verified,
        })
    }
}

#[cfg(test)]
mod test {
    use super::InboundGroupSession;
    use crate::megolm::GroupSession;

    #[test]
    fn advance_inbound_session() {
        let mut session = InboundGroupSession::from(&GroupSession::new());

        assert_eq!(session.first_known_index(), 0);
        assert_eq!(session.latest_ratchet.index(), 0);

        assert!(session.advance_to(10));
        assert_eq!(session.first_known_index(), 10);
        assert_eq!(session.latest_ratchet.index(), 10);

        assert!(!session.advance_to(10));

        assert!(session.advance_to(20));
        assert_eq!(session.first_known_index(), 20);
        assert_eq!(session.latest_ratchet.index(), 20);
    }

    #[test]
    fn inbound_pickle_round_trip() {
        let outbound = GroupSession::new();
        let session = InboundGroupSession::from(&outbound);

        let pickle = session.pickle(b"A pickle key");
        let unpickled = InboundGroupSession::from_pickle(&pickle, b"A pickle key")
            .expect("Our own pickle should unpickle");

        assert_eq!(session.session_id(), unpickled.session_id());
        assert_eq!(session.first_known_index(), unpickled.first_known_index());
        assert_eq!(session.signing_key_verified, unpickled.signing_key_verified);
    }

    #[test]
    fn imported_sessions_are_not_verified() {
        let outbound = GroupSession::new();
        let mut session = InboundGroupSession::from(&outbound);

        assert!(session.signing_key_verified);

        let export = session.export_at(0).expect("The initial index is exportable");
        let imported = InboundGroupSession::import(&export);

        assert!(!imported.signing_key_verified);
        assert_eq!(session.session_id(), imported.session_id());
    }
}
