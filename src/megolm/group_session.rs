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

use rand::{thread_rng, CryptoRng, RngCore};
use zeroize::Zeroize;

use super::{
    message::MegolmMessage,
    ratchet::Ratchet,
    session_keys::{ExportedSessionKey, SessionKey},
};
use crate::{
    cipher::Cipher,
    types::Ed25519Keypair,
    utilities::{open_pickle, seal_pickle, Decode, DecodeSecret, Encode, PickleDecodeError},
    PickleError,
};

const PICKLE_VERSION: u32 = 1;

/// A Megolm group session represents a single sending participant in an
/// encrypted group communication context containing multiple receiving
/// parties.
///
/// A group session consists of a ratchet, used for encryption, and an
/// Ed25519 signing key pair, used for authenticity.
///
/// A group session containing the signing key pair is also known as an
/// "outbound" group session. We differentiate this from an *inbound* group
/// session where this key pair has been removed and which can be used solely
/// for receipt and decryption of messages.
///
/// Such an inbound group session is typically sent by the outbound group
/// session owner to each of the receiving parties via a secure peer-to-peer
/// channel (e.g. an Olm channel).
pub struct GroupSession {
    ratchet: Ratchet,
    signing_key: Ed25519Keypair,
}

impl std::fmt::Debug for GroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSession").finish_non_exhaustive()
    }
}

impl Default for GroupSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupSession {
    /// Construct a new group session, with a random ratchet state and signing
    /// key pair.
    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    /// Construct a new group session using the given source of randomness.
    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self { signing_key: Ed25519Keypair::new_from_rng(rng), ratchet: Ratchet::new_from_rng(rng) }
    }

    /// Returns the globally unique session ID, in base64-encoded form.
    ///
    /// A session ID is the public part of the Ed25519 key pair associated
    /// with the group session. Due to the construction, every session ID is
    /// (probabilistically) globally unique.
    pub fn session_id(&self) -> String {
        self.signing_key.public_key().to_base64()
    }

    /// Return the current message index.
    ///
    /// The message index is incremented each time a message is encrypted
    /// with the group session.
    pub const fn message_index(&self) -> u32 {
        self.ratchet.index()
    }

    /// Encrypt the `plaintext` with the group session.
    ///
    /// The resulting ciphertext is MAC-ed, then signed with the group
    /// session's Ed25519 key pair.
    pub fn encrypt(&mut self, plaintext: impl AsRef<[u8]>) -> MegolmMessage {
        let cipher = Cipher::new_megolm(self.ratchet.as_bytes());

        let message = MegolmMessage::encrypt(
            self.message_index(),
            &cipher,
            &self.signing_key,
            plaintext.as_ref(),
        );

        self.ratchet.advance();

        message
    }

    /// Export the group session into a session key.
    ///
    /// The session key contains the key version constant, the current
    /// message index, the ratchet state and the *public* part of the signing
    /// key pair. It is signed by the signing key pair for authenticity.
    ///
    /// The session key is in a portable format, suitable for sending over
    /// the network. It is typically sent to other group participants so that
    /// they can reconstruct an inbound group session in order to decrypt
    /// messages sent by this group session.
    pub fn session_key(&self) -> SessionKey {
        let session_key = ExportedSessionKey::new(&self.ratchet, self.signing_key.public_key());

        SessionKey::new(session_key, &self.signing_key)
    }

    pub(super) const fn ratchet(&self) -> &Ratchet {
        &self.ratchet
    }

    pub(super) fn signing_key(&self) -> &Ed25519Keypair {
        &self.signing_key
    }

    /// Pickle the group session, producing an encrypted, authenticated and
    /// base64-encoded serialization of its state under the given key.
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        let pickle = GroupSessionPickle::from(self);
        let mut payload = pickle.encode_to_vec();

        let ret = seal_pickle(&payload, pickle_key, PICKLE_VERSION);

        payload.zeroize();

        ret
    }

    /// Restore a [`GroupSession`] from a pickle, given the key it was
    /// pickled with.
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        let (version, mut payload) = open_pickle(pickle, pickle_key)?;

        let result = match version {
            PICKLE_VERSION => {
                GroupSessionPickle::decode_from_slice(&payload).map_err(PickleError::from)
            }
            _ => Err(PickleError::Version(version)),
        };

        payload.zeroize();

        result?.try_into()
    }
}

struct GroupSessionPickle {
    ratchet: Box<[u8; Ratchet::RATCHET_LENGTH]>,
    ratchet_index: u32,
    public_signing_key: [u8; 32],
    private_signing_key: Box<[u8; 64]>,
}

impl Drop for GroupSessionPickle {
    fn drop(&mut self) {
        self.ratchet.zeroize();
        self.private_signing_key.zeroize();
    }
}

impl Encode for GroupSessionPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet.as_ref().encode(writer)?;
        self.ratchet_index.encode(writer)?;
        self.public_signing_key.encode(writer)?;
        self.private_signing_key.as_ref().encode(writer)
    }
}

impl Decode for GroupSessionPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            ratchet: <[u8; Ratchet::RATCHET_LENGTH]>::decode_secret(reader)?,
            ratchet_index: u32::decode(reader)?,
            public_signing_key: <[u8; 32]>::decode(reader)?,
            private_signing_key: <[u8; 64]>::decode_secret(reader)?,
        })
    }
}

impl From<&GroupSession> for GroupSessionPickle {
    fn from(session: &GroupSession) -> Self {
        Self {
            ratchet: Box::new(*session.ratchet.as_bytes()),
            ratchet_index: session.ratchet.index(),
            public_signing_key: *session.signing_key.public_key().as_bytes(),
            private_signing_key: session.signing_key.expanded_secret_key(),
        }
    }
}

impl TryFrom<GroupSessionPickle> for GroupSession {
    type Error = PickleError;

    fn try_from(pickle: GroupSessionPickle) -> Result<Self, Self::Error> {
        Ok(Self {
            ratchet: Ratchet::from_bytes(*pickle.ratchet, pickle.ratchet_index),
            signing_key: Ed25519Keypair::from_expanded_key(&pickle.private_signing_key)?,
        })
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::GroupSession;
    use crate::PickleError;

    const PICKLE_KEY: &[u8; 32] = &[0u8; 32];

    #[test]
    fn group_session_pickle_round_trip() {
        let mut session = GroupSession::new();

        session.encrypt("Pad the ratchet forward");
        session.encrypt("A bit more");

        let pickle = session.pickle(PICKLE_KEY);
        let mut unpickled = GroupSession::from_pickle(&pickle, PICKLE_KEY)
            .expect("Our own pickle should unpickle");

        assert_eq!(session.session_id(), unpickled.session_id());
        assert_eq!(session.message_index(), unpickled.message_index());

        // The unpickled session should produce messages the original
        // session's receivers can decrypt.
        let message = unpickled.encrypt("Still the same session");
        let mut inbound = crate::megolm::InboundGroupSession::from(&session);

        let decrypted = inbound.decrypt(&message).expect("The message should decrypt");
        assert_eq!(decrypted.plaintext, b"Still the same session");
    }

    #[test]
    fn group_session_pickles_are_authenticated() {
        let session = GroupSession::new();
        let pickle = session.pickle(PICKLE_KEY);

        assert_matches!(
            GroupSession::from_pickle(&pickle, b"Not the pickle key"),
            Err(PickleError::Decryption(_))
        );
    }
}
