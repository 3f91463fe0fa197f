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

mod fallback_keys;
mod one_time_keys;

use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Write},
};

pub use one_time_keys::OneTimeKeyGenerationResult;
use rand::{thread_rng, CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::ReusableSecret;
use zeroize::Zeroize;

use self::{
    fallback_keys::{FallbackKey, FallbackKeys},
    one_time_keys::OneTimeKeys,
};
use super::{
    messages::PreKeyMessage,
    session::{DecryptionError, Session},
    session_keys::SessionKeys,
    shared_secret::{RemoteShared3DHSecret, Shared3DHSecret},
};
use crate::{
    types::{Curve25519Keypair, Curve25519SecretKey, Ed25519Keypair, KeyId},
    utilities::{
        ensure_fully_consumed, open_pickle, seal_pickle, Decode, DecodeSecret, Encode,
        PickleDecodeError,
    },
    Curve25519PublicKey, Ed25519PublicKey, Ed25519Signature, KeyError, PickleError,
};

/// The number of one-time keys an account advertises to its callers.
pub const PUBLIC_MAX_ONE_TIME_KEYS: usize = 50;

const PICKLE_VERSION: u32 = 4;
const PICKLE_VERSION_NO_FALLBACK_KEYS: u32 = 3;
const PICKLE_VERSION_LEGACY: u32 = 1;

/// Error describing failure modes when creating an Olm Session from an
/// incoming Olm message.
#[derive(Error, Debug)]
pub enum SessionCreationError {
    /// The pre-key message contained an unknown one-time key. This happens
    /// either because we never had such a one-time key, or because it has
    /// already been used up.
    #[error("The pre-key message contained an unknown one-time key")]
    MissingOneTimeKey,
    /// The pre-key message contains a Curve25519 identity key that doesn't
    /// match the identity key that was given.
    #[error("The given identity key doesn't match the one in the pre-key message")]
    MismatchedIdentityKey,
    /// At least one of the keys in the pre-key message did not have
    /// contributory behaviour, the session would have been insecure.
    #[error("The pre-key message contained a non-contributory key")]
    NonContributoryKey,
    /// The pre-key message that was used to establish the session couldn't
    /// be decrypted. The message needs to be decryptable, otherwise we will
    /// have created a session that wasn't used to encrypt the pre-key
    /// message.
    #[error("The message that was used to establish the Session couldn't be decrypted")]
    Decryption(#[from] DecryptionError),
}

/// Struct holding the two public identity keys of an [`Account`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdentityKeys {
    /// The Curve25519 key, used to establish shared secrets.
    pub curve25519: Curve25519PublicKey,
    /// The Ed25519 key, used for signing.
    pub ed25519: Ed25519PublicKey,
}

/// Return type for the creation of inbound [`Session`] objects.
#[derive(Debug)]
pub struct InboundCreationResult {
    /// The [`Session`] that was created from a pre-key message.
    pub session: Session,
    /// The plaintext of the pre-key message.
    pub plaintext: Vec<u8>,
}

/// An Olm account manages all cryptographic keys used on a device.
pub struct Account {
    /// A permanent Ed25519 key used for signing. Also known as the
    /// fingerprint key.
    signing_key: Ed25519Keypair,
    /// The permanent Curve25519 key used for 3DH. Also known as the sender
    /// key or the identity key.
    diffie_hellman_key: Curve25519Keypair,
    /// The ephemeral (one-time) Curve25519 keys used as part of the 3DH.
    one_time_keys: OneTimeKeys,
    /// The ephemeral Curve25519 keys used in lieu of a one-time key as part
    /// of the 3DH, in case we run out of those. We keep track of both the
    /// current and the previous fallback key in any given moment.
    fallback_keys: FallbackKeys,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").finish_non_exhaustive()
    }
}

impl Account {
    /// Create a new `Account` with new random identity keys.
    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    /// Create a new `Account` using the given source of randomness for the
    /// identity keys.
    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self {
            signing_key: Ed25519Keypair::new_from_rng(rng),
            diffie_hellman_key: Curve25519Keypair::new_from_rng(rng),
            one_time_keys: OneTimeKeys::new(),
            fallback_keys: FallbackKeys::new(),
        }
    }

    /// Get the public parts of the identity keys of the account.
    pub fn identity_keys(&self) -> IdentityKeys {
        IdentityKeys { curve25519: self.curve25519_key(), ed25519: self.ed25519_key() }
    }

    /// Get the public parts of the identity keys of the account as a JSON
    /// string of the form `{"curve25519":"...","ed25519":"..."}`.
    pub fn identity_keys_json(&self) -> String {
        serde_json::to_string(&self.identity_keys())
            .expect("We should be able to serialize the identity keys")
    }

    /// Get the public part of the Ed25519 identity key of the account.
    pub fn ed25519_key(&self) -> Ed25519PublicKey {
        self.signing_key.public_key()
    }

    /// Get the public part of the Curve25519 identity key of the account.
    pub fn curve25519_key(&self) -> Curve25519PublicKey {
        self.diffie_hellman_key.public_key()
    }

    /// Sign the given message using the account's Ed25519 fingerprint key.
    pub fn sign(&self, message: impl AsRef<[u8]>) -> Ed25519Signature {
        self.signing_key.sign(message.as_ref())
    }

    /// Get the maximum number of one-time keys the client should keep on the
    /// server.
    pub const fn max_number_of_one_time_keys(&self) -> usize {
        // We tell clients to upload a limited amount of one-time keys, the
        // amount we store is larger.
        //
        // A client might receive the count of uploaded keys from the server
        // before it receives all the pre-key messages that used some of the
        // one-time keys. If the count was the store size, generating new keys
        // would forget private one-time keys for pre-key messages which are
        // still in flight.
        PUBLIC_MAX_ONE_TIME_KEYS
    }

    /// Create a [`Session`] with the given identity key and one-time key.
    pub fn create_outbound_session(
        &self,
        identity_key: Curve25519PublicKey,
        one_time_key: Curve25519PublicKey,
    ) -> Result<Session, KeyError> {
        let rng = thread_rng();

        let base_key = ReusableSecret::random_from_rng(rng);
        let public_base_key = Curve25519PublicKey::from(&base_key);

        let shared_secret = Shared3DHSecret::new(
            self.diffie_hellman_key.secret_key(),
            &base_key,
            &identity_key,
            &one_time_key,
        )
        .ok_or(KeyError::NonContributoryKey)?;

        let session_keys = SessionKeys {
            identity_key: self.curve25519_key(),
            base_key: public_base_key,
            one_time_key,
        };

        Ok(Session::new(shared_secret, session_keys))
    }

    /// Create a [`Session`] from the given pre-key message.
    ///
    /// The identity key of the message sender is taken from the pre-key
    /// message itself; use [`Account::create_inbound_session_from`] if the
    /// sender's identity key is known through another channel.
    pub fn create_inbound_session(
        &mut self,
        pre_key_message: &PreKeyMessage,
    ) -> Result<InboundCreationResult, SessionCreationError> {
        self.create_inbound_session_from(&pre_key_message.identity_key(), pre_key_message)
    }

    /// Create a [`Session`] from the given pre-key message and the known
    /// identity key of the message sender.
    pub fn create_inbound_session_from(
        &mut self,
        their_identity_key: &Curve25519PublicKey,
        pre_key_message: &PreKeyMessage,
    ) -> Result<InboundCreationResult, SessionCreationError> {
        if their_identity_key != &pre_key_message.identity_key() {
            Err(SessionCreationError::MismatchedIdentityKey)
        } else {
            // Find the matching private key that the message claims was used
            // to create the session that encrypted it.
            let one_time_key = self
                .find_one_time_key(&pre_key_message.one_time_key())
                .ok_or(SessionCreationError::MissingOneTimeKey)?;

            // Construct a 3DH shared secret from the various Curve25519 keys.
            let shared_secret = RemoteShared3DHSecret::new(
                self.diffie_hellman_key.secret_key(),
                one_time_key,
                &pre_key_message.identity_key(),
                &pre_key_message.base_key(),
            )
            .ok_or(SessionCreationError::NonContributoryKey)?;

            // These will be used to uniquely identify the session.
            let session_keys = SessionKeys {
                identity_key: pre_key_message.identity_key(),
                base_key: pre_key_message.base_key(),
                one_time_key: pre_key_message.one_time_key(),
            };

            // Create a session, AKA a double ratchet. This one will have an
            // inactive sending chain until we decide to encrypt a message.
            let mut session = Session::new_remote(
                shared_secret,
                pre_key_message.message().ratchet_key(),
                session_keys,
            );

            // Decrypt the message to check that the session is actually
            // valid.
            let plaintext = session.decrypt_decoded(pre_key_message.message())?;

            // We only drop the one-time key now. If we dropped it before the
            // decryption, someone could maliciously pretend to use up our
            // one-time key and make us forget the private part. Unsuspecting
            // users that try to use such a one-time key wouldn't be able to
            // communicate with us, which is strictly worse than the one-time
            // key exhaustion scenario.
            self.remove_one_time_key(&pre_key_message.one_time_key());

            Ok(InboundCreationResult { session, plaintext })
        }
    }

    fn find_one_time_key(&self, public_key: &Curve25519PublicKey) -> Option<&Curve25519SecretKey> {
        self.one_time_keys
            .get_secret_key(public_key)
            .or_else(|| self.fallback_keys.get_secret_key(public_key))
    }

    fn remove_one_time_key(
        &mut self,
        public_key: &Curve25519PublicKey,
    ) -> Option<Curve25519SecretKey> {
        self.one_time_keys.remove_secret_key(public_key)
    }

    /// Remove the one-time key that was used to establish the given
    /// [`Session`].
    ///
    /// **Note**: This function is only rarely useful and you'll know if you
    /// need it. You do *not* need to call it when using up a key via
    /// [`Account::create_inbound_session`] since the key is automatically
    /// removed in that case.
    pub fn remove_one_time_keys(&mut self, session: &Session) -> Option<Curve25519SecretKey> {
        self.remove_one_time_key(&session.session_keys().one_time_key)
    }

    /// Generate the supplied number of one-time keys.
    ///
    /// Returns the public parts of the keys that were created and, if the
    /// internal store overflowed, of the keys that were discarded to make
    /// room for them.
    pub fn generate_one_time_keys(&mut self, count: usize) -> OneTimeKeyGenerationResult {
        self.one_time_keys.generate(count)
    }

    /// Get the currently unpublished one-time keys.
    ///
    /// The one-time keys should be published to a server and marked as
    /// published using the [`Account::mark_keys_as_published()`] method.
    pub fn one_time_keys(&self) -> HashMap<KeyId, Curve25519PublicKey> {
        self.one_time_keys
            .unpublished_public_keys
            .iter()
            .map(|(key_id, key)| (*key_id, *key))
            .collect()
    }

    /// Get the currently unpublished one-time keys as a JSON string of the
    /// form `{"curve25519":{"<key id>":"<key>",...}}`.
    pub fn one_time_keys_json(&self) -> String {
        let key_map = CurveKeyMap {
            curve25519: self
                .one_time_keys
                .unpublished_public_keys
                .iter()
                .map(|(key_id, key)| (key_id.to_base64(), key.to_base64()))
                .collect(),
        };

        serde_json::to_string(&key_map).expect("We should be able to serialize the one-time keys")
    }

    /// Generate a single new fallback key.
    ///
    /// The fallback key will be used by other users to establish a
    /// [`Session`] if all the one-time keys on the server have been used up.
    /// The previous fallback key, if any, stays usable for incoming messages
    /// until [`Account::forget_old_fallback_key`] is called.
    ///
    /// Returns the public part of the fallback key that was discarded from
    /// the previous slot, if any.
    pub fn generate_fallback_key(&mut self) -> Option<Curve25519PublicKey> {
        self.fallback_keys.generate_fallback_key()
    }

    /// Get the current fallback key, whether it has been published or not.
    pub fn fallback_key(&self) -> HashMap<KeyId, Curve25519PublicKey> {
        self.fallback_keys
            .fallback_key
            .as_ref()
            .map(|f| HashMap::from([(f.key_id(), f.public_key())]))
            .unwrap_or_default()
    }

    /// Get the current fallback key, if it has not yet been published.
    ///
    /// The fallback key should be published just like the one-time keys;
    /// after it has been successfully published it needs to be marked as
    /// published using the [`Account::mark_keys_as_published()`] method.
    pub fn unpublished_fallback_key(&self) -> HashMap<KeyId, Curve25519PublicKey> {
        self.fallback_keys
            .unpublished_fallback_key()
            .map(|f| HashMap::from([(f.key_id(), f.public_key())]))
            .unwrap_or_default()
    }

    /// Get the currently unpublished fallback key as a JSON string of the
    /// form `{"curve25519":{"<key id>":"<key>"}}`.
    pub fn unpublished_fallback_key_json(&self) -> String {
        let key_map = CurveKeyMap {
            curve25519: self
                .fallback_keys
                .unpublished_fallback_key()
                .map(|f| (f.key_id().to_base64(), f.public_key().to_base64()))
                .into_iter()
                .collect(),
        };

        serde_json::to_string(&key_map).expect("We should be able to serialize the fallback key")
    }

    /// The `Account` stores at most two private parts of the fallback key.
    /// This method lets us forget the previously used fallback key.
    ///
    /// Returns true if there was a previous fallback key to forget.
    pub fn forget_old_fallback_key(&mut self) -> bool {
        self.fallback_keys.forget_previous_fallback_key().is_some()
    }

    /// Mark all currently unpublished one-time and fallback keys as
    /// published.
    pub fn mark_keys_as_published(&mut self) {
        self.one_time_keys.mark_as_published();
        self.fallback_keys.mark_as_published();
    }

    /// Pickle the account, producing an encrypted, authenticated and
    /// base64-encoded serialization of its state under the given key.
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        let pickle = AccountPickle::from(self);
        let mut payload = pickle.encode_to_vec();

        let ret = seal_pickle(&payload, pickle_key, PICKLE_VERSION);

        payload.zeroize();

        ret
    }

    /// Restore an [`Account`] from a pickle, given the key it was pickled
    /// with.
    ///
    /// Every historically produced pickle version is accepted; pickles
    /// always get written using the newest version.
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        let (version, mut payload) = open_pickle(pickle, pickle_key)?;

        let result = match version {
            PICKLE_VERSION | PICKLE_VERSION_NO_FALLBACK_KEYS => {
                let mut cursor = std::io::Cursor::new(payload.as_slice());
                let pickle = AccountPickle::decode_with_version(&mut cursor, version);

                pickle
                    .and_then(|p| ensure_fully_consumed(&mut cursor).map(|_| p))
                    .map_err(PickleError::from)
            }
            PICKLE_VERSION_LEGACY => {
                let mut cursor = std::io::Cursor::new(payload.as_slice());
                let pickle = AccountPickle::decode_legacy(&mut cursor);

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

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for the boundary JSON of one-time and fallback keys.
#[derive(Serialize)]
struct CurveKeyMap {
    curve25519: BTreeMap<String, String>,
}

struct OneTimeKeyPickle {
    key_id: u32,
    published: bool,
    public_key: [u8; 32],
    private_key: Box<[u8; 32]>,
}

impl Drop for OneTimeKeyPickle {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl Encode for OneTimeKeyPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.key_id.encode(writer)?;
        self.published.encode(writer)?;
        self.public_key.encode(writer)?;
        self.private_key.as_ref().encode(writer)
    }
}

impl Decode for OneTimeKeyPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            key_id: u32::decode(reader)?,
            published: bool::decode(reader)?,
            public_key: <[u8; 32]>::decode(reader)?,
            private_key: <[u8; 32]>::decode_secret(reader)?,
        })
    }
}

impl From<&OneTimeKeyPickle> for FallbackKey {
    fn from(pickle: &OneTimeKeyPickle) -> Self {
        FallbackKey {
            key_id: KeyId(pickle.key_id.into()),
            key: Curve25519SecretKey::from_slice(&pickle.private_key),
            published: pickle.published,
        }
    }
}

struct FallbackKeysPickle {
    fallback_key: Option<OneTimeKeyPickle>,
    previous_fallback_key: Option<OneTimeKeyPickle>,
}

impl Encode for FallbackKeysPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        // Fallback keys use a u8 count instead of the u32 lengths of the
        // regular lists.
        let count: u8 = match (&self.fallback_key, &self.previous_fallback_key) {
            (None, _) => 0,
            (Some(_), None) => 1,
            (Some(_), Some(_)) => 2,
        };

        count.encode(writer)?;

        if let Some(key) = &self.fallback_key {
            key.encode(writer)?;
        }

        if self.fallback_key.is_some() {
            if let Some(key) = &self.previous_fallback_key {
                key.encode(writer)?;
            }
        }

        Ok(())
    }
}

impl Decode for FallbackKeysPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let count = u8::decode(reader)?;

        let (fallback_key, previous_fallback_key) = if count >= 1 {
            let fallback_key = OneTimeKeyPickle::decode(reader)?;

            let previous_fallback_key =
                if count >= 2 { Some(OneTimeKeyPickle::decode(reader)?) } else { None };

            (Some(fallback_key), previous_fallback_key)
        } else {
            (None, None)
        };

        Ok(Self { fallback_key, previous_fallback_key })
    }
}

struct AccountPickle {
    public_ed25519_key: [u8; 32],
    private_ed25519_key: Box<[u8; 64]>,
    public_curve25519_key: [u8; 32],
    private_curve25519_key: Box<[u8; 32]>,
    one_time_keys: Vec<OneTimeKeyPickle>,
    fallback_keys: Option<FallbackKeysPickle>,
    /// Set when the pickle was read from the legacy layout, which requires
    /// the stricter validity checks.
    legacy: bool,
}

impl Drop for AccountPickle {
    fn drop(&mut self) {
        self.private_ed25519_key.zeroize();
        self.private_curve25519_key.zeroize();
    }
}

impl Encode for AccountPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.public_ed25519_key.encode(writer)?;
        self.private_ed25519_key.as_ref().encode(writer)?;
        self.public_curve25519_key.encode(writer)?;
        self.private_curve25519_key.as_ref().encode(writer)?;
        self.one_time_keys.encode(writer)?;

        if let Some(fallback_keys) = &self.fallback_keys {
            fallback_keys.encode(writer)?;
        }

        Ok(())
    }
}

impl AccountPickle {
    fn decode_with_version(
        reader: &mut impl Read,
        version: u32,
    ) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            public_ed25519_key: <[u8; 32]>::decode(reader)?,
            private_ed25519_key: <[u8; 64]>::decode_secret(reader)?,
            public_curve25519_key: <[u8; 32]>::decode(reader)?,
            private_curve25519_key: <[u8; 32]>::decode_secret(reader)?,
            one_time_keys: Vec::decode(reader)?,
            fallback_keys: if version >= PICKLE_VERSION {
                Some(FallbackKeysPickle::decode(reader)?)
            } else {
                None
            },
            legacy: false,
        })
    }

    /// Decode the legacy account layout, which stored the 32-byte Ed25519
    /// seed instead of the expanded key and had no fallback keys.
    fn decode_legacy(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let public_ed25519_key = <[u8; 32]>::decode(reader)?;
        let mut ed25519_seed = <[u8; 32]>::decode_secret(reader)?;

        let keypair = Ed25519Keypair::from_seed(&ed25519_seed);
        let private_ed25519_key = keypair.expanded_secret_key();

        ed25519_seed.zeroize();

        Ok(Self {
            public_ed25519_key,
            private_ed25519_key,
            public_curve25519_key: <[u8; 32]>::decode(reader)?,
            private_curve25519_key: <[u8; 32]>::decode_secret(reader)?,
            one_time_keys: Vec::decode(reader)?,
            fallback_keys: None,
            legacy: true,
        })
    }
}

impl From<&Account> for AccountPickle {
    fn from(account: &Account) -> Self {
        let one_time_keys = account
            .one_time_keys
            .secret_keys()
            .iter()
            .map(|(key_id, key)| OneTimeKeyPickle {
                key_id: u32::try_from(key_id.0).expect("The key id fits into a u32"),
                published: account.one_time_keys.is_secret_key_published(key_id),
                public_key: Curve25519PublicKey::from(key).to_bytes(),
                private_key: Box::new(key.to_bytes()),
            })
            .collect();

        let fallback_key_pickle = |key: &FallbackKey| OneTimeKeyPickle {
            key_id: u32::try_from(key.key_id().0).expect("The key id fits into a u32"),
            published: key.published(),
            public_key: key.public_key().to_bytes(),
            private_key: Box::new(key.secret_key().to_bytes()),
        };

        let fallback_keys = FallbackKeysPickle {
            fallback_key: account.fallback_keys.fallback_key.as_ref().map(fallback_key_pickle),
            previous_fallback_key: account
                .fallback_keys
                .previous_fallback_key
                .as_ref()
                .map(fallback_key_pickle),
        };

        Self {
            public_ed25519_key: *account.signing_key.public_key().as_bytes(),
            private_ed25519_key: account.signing_key.expanded_secret_key(),
            public_curve25519_key: account.curve25519_key().to_bytes(),
            private_curve25519_key: Box::new(account.diffie_hellman_key.secret_key().to_bytes()),
            one_time_keys,
            fallback_keys: Some(fallback_keys),
            legacy: false,
        }
    }
}

impl TryFrom<AccountPickle> for Account {
    type Error = PickleError;

    fn try_from(pickle: AccountPickle) -> Result<Self, Self::Error> {
        let signing_key = Ed25519Keypair::from_expanded_key(&pickle.private_ed25519_key)?;
        let diffie_hellman_key = Curve25519Keypair::from_secret_key(&pickle.private_curve25519_key);

        // The legacy layout has a stricter validity check, the stored public
        // keys must match the ones derived from the secret halves.
        if pickle.legacy
            && (signing_key.public_key().as_bytes() != &pickle.public_ed25519_key
                || diffie_hellman_key.public_key().to_bytes() != pickle.public_curve25519_key)
        {
            return Err(PickleError::InvalidLegacyAccount);
        }

        let mut one_time_keys = OneTimeKeys::new();
        let mut max_key_id = 0;

        for key in &pickle.one_time_keys {
            let secret_key = Curve25519SecretKey::from_slice(&key.private_key);
            let key_id = KeyId(key.key_id.into());
            one_time_keys.insert_secret_key(key_id, secret_key, key.published);

            if key_id.0 > max_key_id {
                max_key_id = key_id.0;
            }
        }

        // If there are no one-time keys in the pickle our key id will be 0,
        // otherwise we'll have to use the max found key id and increment it.
        one_time_keys.next_key_id =
            if pickle.one_time_keys.is_empty() { 0 } else { max_key_id + 1 };

        let fallback_keys = match &pickle.fallback_keys {
            Some(fallback_keys) => FallbackKeys {
                key_id: fallback_keys
                    .fallback_key
                    .as_ref()
                    .map(|k| u64::from(k.key_id) + 1)
                    .unwrap_or(0),
                fallback_key: fallback_keys.fallback_key.as_ref().map(|k| k.into()),
                previous_fallback_key: fallback_keys
                    .previous_fallback_key
                    .as_ref()
                    .map(|k| k.into()),
            },
            None => FallbackKeys::new(),
        };

        Ok(Self { signing_key, diffie_hellman_key, one_time_keys, fallback_keys })
    }
}
