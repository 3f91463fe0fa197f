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

mod chain_key;
mod double_ratchet;
mod message_key;
mod ratchet;
mod receiver_chain;
mod root_key;

use std::fmt::Write as _;
use std::io::{Read, Write};

use aes::cipher::block_padding::UnpadError;
use arrayvec::ArrayVec;
use chain_key::{ChainKey, RemoteChainKey};
use double_ratchet::DoubleRatchet;
use hmac::digest::MacError;
use message_key::RemoteMessageKey;
use ratchet::{Ratchet, RatchetKey, RemoteRatchetKey};
use receiver_chain::ReceiverChain;
pub use receiver_chain::{MAX_MESSAGE_GAP, MAX_MESSAGE_KEYS};
use root_key::{RemoteRootKey, RootKey};
use thiserror::Error;
use zeroize::Zeroize;

use super::{
    session_keys::SessionKeys,
    shared_secret::{RemoteShared3DHSecret, Shared3DHSecret},
};
use crate::{
    olm::messages::{Message, OlmMessage, PreKeyMessage},
    types::Curve25519SecretKey,
    utilities::{open_pickle, seal_pickle, Decode, DecodeSecret, Encode, PickleDecodeError},
    Curve25519PublicKey, PickleError,
};

/// The maximum number of receiving chains a session keeps around to decrypt
/// late messages from earlier ratchet steps. The oldest chain is discarded
/// once the store overflows.
pub const MAX_RECEIVING_CHAINS: usize = 5;

const PICKLE_VERSION: u32 = 1;

#[derive(Clone, Default)]
struct ChainStore {
    inner: ArrayVec<ReceiverChain, MAX_RECEIVING_CHAINS>,
}

impl ChainStore {
    fn new() -> Self {
        Self { inner: ArrayVec::new() }
    }

    fn push(&mut self, ratchet: ReceiverChain) {
        if self.inner.is_full() {
            self.inner.pop_at(0);
        }

        self.inner.push(ratchet)
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn last(&self) -> Option<&ReceiverChain> {
        self.inner.last()
    }

    fn find_ratchet(&mut self, ratchet_key: &RemoteRatchetKey) -> Option<&mut ReceiverChain> {
        self.inner.iter_mut().find(|r| r.belongs_to(ratchet_key))
    }
}

/// Error type describing the failure modes of Olm message decryption.
#[derive(Error, Debug)]
pub enum DecryptionError {
    #[error("Failed decrypting Olm message, invalid MAC: {0}")]
    InvalidMAC(#[from] MacError),
    #[error("Failed decrypting Olm message, invalid ciphertext padding")]
    InvalidCiphertext(#[from] UnpadError),
    #[error("The message key with the given index has already been used up, message index: {0}")]
    MissingMessageKey(u64),
    #[error("The message gap was too big, got {0}, max allowed {1}")]
    TooBigMessageGap(u64, u64),
}

/// An Olm session represents one end of an encrypted communication channel
/// between two participants.
///
/// A session enables the session owner to encrypt messages intended for, and
/// decrypt messages sent by, the other participant of the channel.
///
/// Olm sessions have two important properties:
///
/// 1. They are based on a double ratchet algorithm which continuously
///    introduces new entropy into the channel as messages are sent and
///    received. This imbues the channel with *self-healing* properties,
///    allowing it to recover from a momentary loss of confidentiality in the
///    event of a key compromise.
/// 2. They are *asynchronous*, allowing the participant to start sending
///    messages to the other side even if the other participant is not online
///    at the moment.
///
/// An Olm [`Session`] is acquired from an [`Account`], by calling either
///
/// - [`Account::create_outbound_session`], if you are the first participant
///   to send a message in this channel, or
/// - [`Account::create_inbound_session`], if the other participant initiated
///   the channel by sending you a message.
///
/// [`Account`]: crate::olm::Account
/// [`Account::create_outbound_session`]: crate::olm::Account::create_outbound_session
/// [`Account::create_inbound_session`]: crate::olm::Account::create_inbound_session
pub struct Session {
    session_keys: SessionKeys,
    sending_ratchet: DoubleRatchet,
    receiving_chains: ChainStore,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("session_id", &self.session_id()).finish_non_exhaustive()
    }
}

impl Session {
    pub(super) fn new(shared_secret: Shared3DHSecret, session_keys: SessionKeys) -> Self {
        let local_ratchet = DoubleRatchet::active(shared_secret);

        Self { session_keys, sending_ratchet: local_ratchet, receiving_chains: Default::default() }
    }

    pub(super) fn new_remote(
        shared_secret: RemoteShared3DHSecret,
        remote_ratchet_key: Curve25519PublicKey,
        session_keys: SessionKeys,
    ) -> Self {
        let (root_key, remote_chain_key) = shared_secret.expand();

        let remote_ratchet_key = RemoteRatchetKey::from(remote_ratchet_key);
        let root_key = RemoteRootKey::new(root_key);
        let remote_chain_key = RemoteChainKey::new(remote_chain_key);

        let local_ratchet = DoubleRatchet::inactive(root_key, remote_ratchet_key);
        let remote_ratchet = ReceiverChain::new(remote_ratchet_key, remote_chain_key);

        let mut ratchet_store = ChainStore::new();
        ratchet_store.push(remote_ratchet);

        Self { session_keys, sending_ratchet: local_ratchet, receiving_chains: ratchet_store }
    }

    /// Returns the globally unique session ID, in base64-encoded form.
    ///
    /// A session ID is the SHA-256 of the concatenation of the account's
    /// identity key, an ephemeral base key and the one-time key which was
    /// used to establish the session. Due to the construction, every session
    /// ID is (probabilistically) globally unique.
    pub fn session_id(&self) -> String {
        self.session_keys.session_id()
    }

    /// The collection of keys that established this session.
    pub fn session_keys(&self) -> SessionKeys {
        self.session_keys
    }

    /// Have we ever received and decrypted a message from the other side?
    ///
    /// Used to decide if outgoing messages should be sent as normal or
    /// pre-key messages.
    pub fn has_received_message(&self) -> bool {
        !self.receiving_chains.is_empty()
    }

    /// Check if the given pre-key message was encrypted for this [`Session`].
    pub fn matches_inbound(&self, message: &PreKeyMessage) -> bool {
        self.session_keys == message.session_keys()
    }

    /// Like [`Session::matches_inbound`], but additionally checks that the
    /// message was sent by the holder of the given identity key.
    pub fn matches_inbound_from(
        &self,
        their_identity_key: &Curve25519PublicKey,
        message: &PreKeyMessage,
    ) -> bool {
        &message.identity_key() == their_identity_key && self.matches_inbound(message)
    }

    /// Encrypt the `plaintext` and construct an [`OlmMessage`].
    ///
    /// The message will either be a pre-key message or a normal message,
    /// depending on whether the session is fully established. A session is
    /// fully established once you receive (and decrypt) at least one message
    /// from the other side.
    pub fn encrypt(&mut self, plaintext: impl AsRef<[u8]>) -> OlmMessage {
        let message = self.sending_ratchet.encrypt(plaintext.as_ref());

        if self.has_received_message() {
            OlmMessage::Normal(message)
        } else {
            OlmMessage::PreKey(PreKeyMessage::new(self.session_keys, message))
        }
    }

    /// Try to decrypt an Olm message, which will either return the plaintext
    /// or result in a [`DecryptionError`].
    pub fn decrypt(&mut self, message: &OlmMessage) -> Result<Vec<u8>, DecryptionError> {
        match message {
            OlmMessage::Normal(m) => self.decrypt_decoded(m),
            OlmMessage::PreKey(m) => self.decrypt_decoded(m.message()),
        }
    }

    pub(super) fn decrypt_decoded(
        &mut self,
        message: &Message,
    ) -> Result<Vec<u8>, DecryptionError> {
        let ratchet_key = RemoteRatchetKey::from(message.ratchet_key);

        if let Some(ratchet) = self.receiving_chains.find_ratchet(&ratchet_key) {
            ratchet.decrypt(message)
        } else {
            let (sending_ratchet, mut remote_ratchet) = self.sending_ratchet.advance(ratchet_key);

            let plaintext = remote_ratchet.decrypt(message)?;

            // The message decrypted correctly, commit the ratchet advance.
            self.sending_ratchet = sending_ratchet;
            self.receiving_chains.push(remote_ratchet);

            Ok(plaintext)
        }
    }

    /// Produce a short human-readable summary of the internal indices of the
    /// session, for diagnostics. No secret material is included.
    pub fn describe(&self) -> String {
        let mut description = String::new();

        match self.sending_ratchet.chain_index() {
            Some(index) => write!(description, "sender chain index: {index}, "),
            None => write!(description, "sender chain index: -, "),
        }
        .expect("Writing into a String never fails");

        let chain_indices: Vec<u64> =
            self.receiving_chains.inner.iter().map(|c| c.chain_index()).collect();
        let skipped_indices: Vec<u64> = self
            .receiving_chains
            .inner
            .iter()
            .flat_map(|c| c.message_keys().map(|k| k.chain_index()))
            .collect();

        write!(
            description,
            "receiver chain indices: {chain_indices:?}, skipped message keys: {skipped_indices:?}"
        )
        .expect("Writing into a String never fails");

        description
    }

    /// Pickle the session, producing an encrypted, authenticated and
    /// base64-encoded serialization of its state under the given key.
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        let pickle = SessionPickle::from(self);
        let mut payload = pickle.encode_to_vec();

        let ret = seal_pickle(&payload, pickle_key, PICKLE_VERSION);

        payload.zeroize();

        ret
    }

    /// Restore a [`Session`] from a pickle, given the key it was pickled
    /// with.
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        let (version, mut payload) = open_pickle(pickle, pickle_key)?;

        let result = match version {
            PICKLE_VERSION => {
                SessionPickle::decode_from_slice(&payload).map_err(PickleError::from)
            }
            _ => Err(PickleError::Version(version)),
        };

        payload.zeroize();

        result?.try_into()
    }
}

struct SenderChainPickle {
    public_ratchet_key: [u8; 32],
    secret_ratchet_key: Box<[u8; 32]>,
    chain_key: Box<[u8; 32]>,
    chain_key_index: u32,
}

impl Drop for SenderChainPickle {
    fn drop(&mut self) {
        self.secret_ratchet_key.zeroize();
        self.chain_key.zeroize();
    }
}

impl Encode for SenderChainPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.public_ratchet_key.encode(writer)?;
        self.secret_ratchet_key.as_ref().encode(writer)?;
        self.chain_key.as_ref().encode(writer)?;
        self.chain_key_index.encode(writer)
    }
}

impl Decode for SenderChainPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            public_ratchet_key: <[u8; 32]>::decode(reader)?,
            secret_ratchet_key: <[u8; 32]>::decode_secret(reader)?,
            chain_key: <[u8; 32]>::decode_secret(reader)?,
            chain_key_index: u32::decode(reader)?,
        })
    }
}

struct ReceiverChainPickle {
    ratchet_key: [u8; 32],
    chain_key: Box<[u8; 32]>,
    chain_key_index: u32,
}

impl Drop for ReceiverChainPickle {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

impl Encode for ReceiverChainPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet_key.encode(writer)?;
        self.chain_key.as_ref().encode(writer)?;
        self.chain_key_index.encode(writer)
    }
}

impl Decode for ReceiverChainPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            ratchet_key: <[u8; 32]>::decode(reader)?,
            chain_key: <[u8; 32]>::decode_secret(reader)?,
            chain_key_index: u32::decode(reader)?,
        })
    }
}

struct MessageKeyPickle {
    ratchet_key: [u8; 32],
    message_key: Box<[u8; 32]>,
    index: u32,
}

impl Drop for MessageKeyPickle {
    fn drop(&mut self) {
        self.message_key.zeroize();
    }
}

impl Encode for MessageKeyPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet_key.encode(writer)?;
        self.message_key.as_ref().encode(writer)?;
        self.index.encode(writer)
    }
}

impl Decode for MessageKeyPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            ratchet_key: <[u8; 32]>::decode(reader)?,
            message_key: <[u8; 32]>::decode_secret(reader)?,
            index: u32::decode(reader)?,
        })
    }
}

struct SessionPickle {
    received_message: bool,
    session_keys: SessionKeys,
    root_key: Box<[u8; 32]>,
    sender_chains: Vec<SenderChainPickle>,
    receiver_chains: Vec<ReceiverChainPickle>,
    message_keys: Vec<MessageKeyPickle>,
}

impl Drop for SessionPickle {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

impl Encode for SessionPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.received_message.encode(writer)?;
        self.session_keys.encode(writer)?;
        self.root_key.as_ref().encode(writer)?;
        self.sender_chains.encode(writer)?;
        self.receiver_chains.encode(writer)?;
        self.message_keys.encode(writer)
    }
}

impl Decode for SessionPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            received_message: bool::decode(reader)?,
            session_keys: SessionKeys::decode(reader)?,
            root_key: <[u8; 32]>::decode_secret(reader)?,
            sender_chains: Vec::decode(reader)?,
            receiver_chains: Vec::decode(reader)?,
            message_keys: Vec::decode(reader)?,
        })
    }
}

impl From<&Session> for SessionPickle {
    fn from(session: &Session) -> Self {
        let sender_chains = session
            .sending_ratchet
            .sender_chain()
            .map(|(ratchet_key, chain_key)| SenderChainPickle {
                public_ratchet_key: ratchet::RatchetPublicKey::from(ratchet_key)
                    .as_ref()
                    .to_bytes(),
                secret_ratchet_key: Box::new(ratchet_key.to_bytes()),
                chain_key: chain_key.as_bytes().clone(),
                chain_key_index: chain_key
                    .index()
                    .try_into()
                    .expect("The chain index fits into a u32"),
            })
            .into_iter()
            .collect();

        let receiver_chains = session
            .receiving_chains
            .inner
            .iter()
            .map(|chain| ReceiverChainPickle {
                ratchet_key: chain.ratchet_key().as_ref().to_bytes(),
                chain_key: chain.chain_key().as_bytes().clone(),
                chain_key_index: chain
                    .chain_key()
                    .chain_index()
                    .try_into()
                    .expect("The chain index fits into a u32"),
            })
            .collect();

        let message_keys = session
            .receiving_chains
            .inner
            .iter()
            .flat_map(|chain| {
                let ratchet_key = chain.ratchet_key().as_ref().to_bytes();

                chain.message_keys().map(move |key| MessageKeyPickle {
                    ratchet_key,
                    message_key: key.key.clone(),
                    index: key.index.try_into().expect("The message index fits into a u32"),
                })
            })
            .collect();

        Self {
            received_message: session.has_received_message(),
            session_keys: session.session_keys,
            root_key: session.sending_ratchet.root_key_bytes().clone(),
            sender_chains,
            receiver_chains,
            message_keys,
        }
    }
}

impl TryFrom<SessionPickle> for Session {
    type Error = PickleError;

    fn try_from(pickle: SessionPickle) -> Result<Self, Self::Error> {
        let mut receiving_chains = ChainStore::new();

        for chain in &pickle.receiver_chains {
            let ratchet_key = RemoteRatchetKey::from(chain.ratchet_key);
            let chain_key =
                RemoteChainKey::from_bytes_and_index(chain.chain_key.clone(), chain.chain_key_index);

            receiving_chains.push(ReceiverChain::new(ratchet_key, chain_key));
        }

        for key in &pickle.message_keys {
            let ratchet_key = RemoteRatchetKey::from(key.ratchet_key);

            if let Some(receiving_chain) = receiving_chains.find_ratchet(&ratchet_key) {
                receiving_chain.insert_message_key(RemoteMessageKey::new(
                    key.message_key.clone(),
                    key.index.into(),
                ))
            }
        }

        if let Some(chain) = pickle.sender_chains.first() {
            let ratchet_key =
                RatchetKey::from(Curve25519SecretKey::from_slice(&chain.secret_ratchet_key));
            let chain_key =
                ChainKey::from_bytes_and_index(chain.chain_key.clone(), chain.chain_key_index);

            let root_key = RootKey::new(pickle.root_key.clone());

            let ratchet = Ratchet::new_with_ratchet_key(root_key, ratchet_key);
            let sending_ratchet = DoubleRatchet::from_ratchet_and_chain_key(ratchet, chain_key);

            Ok(Self { session_keys: pickle.session_keys, sending_ratchet, receiving_chains })
        } else if let Some(chain) = receiving_chains.last() {
            // The ratchet was pickled in the inactive state, the next
            // encryption will advance using the newest remote ratchet key.
            let sending_ratchet = DoubleRatchet::inactive(
                RemoteRootKey::new(pickle.root_key.clone()),
                chain.ratchet_key(),
            );

            Ok(Self { session_keys: pickle.session_keys, sending_ratchet, receiving_chains })
        } else {
            Err(PickleError::InvalidSession)
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{DecryptionError, Session, MAX_MESSAGE_GAP};
    use crate::olm::{Account, InboundCreationResult, OlmMessage};

    const PICKLE_KEY: &[u8; 32] = b"DEFAULT_PICKLE_KEY_0123456789012";

    fn sessions() -> (Session, Session) {
        let alice = Account::new();
        let mut bob = Account::new();

        bob.generate_one_time_keys(1);

        let one_time_key =
            *bob.one_time_keys().values().next().expect("We just generated a one-time key");

        let mut alice_session = alice
            .create_outbound_session(bob.curve25519_key(), one_time_key)
            .expect("The keys are contributory");

        bob.mark_keys_as_published();

        let message = alice_session.encrypt("It's a secret to everybody");

        if let OlmMessage::PreKey(m) = message {
            let InboundCreationResult { session, plaintext } = bob
                .create_inbound_session_from(&alice.curve25519_key(), &m)
                .expect("A message we just encrypted should establish a session");

            assert_eq!(plaintext, b"It's a secret to everybody");

            (alice_session, session)
        } else {
            panic!("The initial message should be a pre-key message");
        }
    }

    #[test]
    fn out_of_order_decryption() {
        let (mut alice_session, mut bob_session) = sessions();

        let message_1 = bob_session.encrypt("Message 1");
        let message_2 = bob_session.encrypt("Message 2");
        let message_3 = bob_session.encrypt("Message 3");

        assert_eq!(
            b"Message 3".as_ref(),
            alice_session.decrypt(&message_3).expect("Out of order messages decrypt")
        );
        assert_eq!(
            b"Message 2".as_ref(),
            alice_session.decrypt(&message_2).expect("Out of order messages decrypt")
        );
        assert_eq!(
            b"Message 1".as_ref(),
            alice_session.decrypt(&message_1).expect("Out of order messages decrypt")
        );
    }

    #[test]
    fn message_keys_are_consumed() {
        let (mut alice_session, mut bob_session) = sessions();

        let _message_1 = bob_session.encrypt("Message 1");
        let message_2 = bob_session.encrypt("Message 2");

        alice_session.decrypt(&message_2).expect("The message should decrypt");

        assert_matches!(
            alice_session.decrypt(&message_2),
            Err(DecryptionError::MissingMessageKey(_))
        );
    }

    #[test]
    fn decryption_after_ratchet_steps() {
        let (mut alice_session, mut bob_session) = sessions();

        let message_1 = bob_session.encrypt("Message 1");
        assert_eq!(
            b"Message 1".as_ref(),
            alice_session.decrypt(&message_1).expect("The first reply decrypts")
        );

        assert_eq!(alice_session.receiving_chains.len(), 1);

        let message_4 = alice_session.encrypt("Message 4");
        assert_eq!(
            b"Message 4".as_ref(),
            bob_session.decrypt(&message_4).expect("The ratchet advance decrypts")
        );

        let message_5 = bob_session.encrypt("Message 5");
        assert_eq!(
            b"Message 5".as_ref(),
            alice_session.decrypt(&message_5).expect("The second chain decrypts")
        );

        assert_eq!(alice_session.receiving_chains.len(), 2);
    }

    #[test]
    fn too_big_message_gaps_are_rejected() {
        let (mut alice_session, mut bob_session) = sessions();

        for _ in 0..=MAX_MESSAGE_GAP {
            bob_session.encrypt("Spam");
        }
        let message = bob_session.encrypt("Message");

        assert_matches!(
            alice_session.decrypt(&message),
            Err(DecryptionError::TooBigMessageGap(gap, MAX_MESSAGE_GAP))
        );
        assert!(gap > MAX_MESSAGE_GAP);
    }

    #[test]
    fn session_pickle_round_trip() {
        let (mut alice_session, mut bob_session) = sessions();

        let message = bob_session.encrypt("A message before pickling");
        alice_session.decrypt(&message).expect("The message should decrypt");

        let pickle = alice_session.pickle(PICKLE_KEY);
        let mut unpickled =
            Session::from_pickle(&pickle, PICKLE_KEY).expect("Our own pickle should unpickle");

        assert_eq!(alice_session.session_id(), unpickled.session_id());
        assert_eq!(alice_session.describe(), unpickled.describe());

        let message = unpickled.encrypt("A message after unpickling");
        assert_eq!(
            b"A message after unpickling".as_ref(),
            bob_session.decrypt(&message).expect("The unpickled session should interoperate")
        );
    }

    #[test]
    fn unpickling_with_a_wrong_key_fails() {
        let (alice_session, _) = sessions();

        let pickle = alice_session.pickle(PICKLE_KEY);

        assert_matches!(
            Session::from_pickle(&pickle, b"Not the pickle key"),
            Err(crate::PickleError::Decryption(_))
        );
    }

    #[test]
    fn describe_mentions_the_indices() {
        let (mut alice_session, mut bob_session) = sessions();

        let _skipped = bob_session.encrypt("Skipped");
        let message = bob_session.encrypt("Received");

        alice_session.decrypt(&message).expect("The message should decrypt");

        let description = alice_session.describe();

        assert!(description.contains("receiver chain indices: [2]"));
        assert!(description.contains("skipped message keys: [0]"));
    }
}
