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

use arrayvec::ArrayVec;

use super::{
    chain_key::RemoteChainKey, message_key::RemoteMessageKey, ratchet::RemoteRatchetKey,
    DecryptionError,
};
use crate::olm::messages::Message;

/// The maximum distance a message counter is allowed to be ahead of the chain
/// head. Advancing further than this in one message is treated as denial of
/// service and rejected.
pub const MAX_MESSAGE_GAP: u64 = 2000;

/// The maximum number of skipped message keys a receiver chain holds on to.
/// The oldest key is discarded once the store overflows.
pub const MAX_MESSAGE_KEYS: usize = 40;

#[derive(Clone)]
struct MessageKeyStore {
    inner: ArrayVec<RemoteMessageKey, MAX_MESSAGE_KEYS>,
}

impl MessageKeyStore {
    fn new() -> Self {
        Self { inner: ArrayVec::new() }
    }

    fn push(&mut self, message_key: RemoteMessageKey) {
        if self.inner.is_full() {
            self.inner.pop_at(0);
        }

        self.inner.push(message_key)
    }

    fn merge(&mut self, mut store: MessageKeyStore) {
        for key in store.inner.drain(..) {
            self.push(key);
        }
    }

    fn get_message_key(&self, chain_index: u64) -> Option<&RemoteMessageKey> {
        self.inner.iter().find(|k| k.chain_index() == chain_index)
    }

    fn remove_message_key(&mut self, chain_index: u64) {
        self.inner.retain(|k| k.chain_index() != chain_index);
    }
}

impl Default for MessageKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiving chain of the double ratchet, keyed by the ratchet key the
/// other side used for it.
#[derive(Clone)]
pub(super) struct ReceiverChain {
    ratchet_key: RemoteRatchetKey,
    hkdf_ratchet: RemoteChainKey,
    skipped_message_keys: MessageKeyStore,
}

impl ReceiverChain {
    pub fn new(ratchet_key: RemoteRatchetKey, chain_key: RemoteChainKey) -> Self {
        ReceiverChain {
            ratchet_key,
            hkdf_ratchet: chain_key,
            skipped_message_keys: Default::default(),
        }
    }

    pub fn decrypt(&mut self, message: &Message) -> Result<Vec<u8>, DecryptionError> {
        let chain_index = self.hkdf_ratchet.chain_index();
        let message_gap = message.chain_index.saturating_sub(chain_index);

        if message_gap > MAX_MESSAGE_GAP {
            Err(DecryptionError::TooBigMessageGap(message_gap, MAX_MESSAGE_GAP))
        } else if chain_index > message.chain_index {
            if let Some(message_key) =
                self.skipped_message_keys.get_message_key(message.chain_index)
            {
                let plaintext = message_key.decrypt(message)?;

                self.skipped_message_keys.remove_message_key(message.chain_index);

                Ok(plaintext)
            } else {
                Err(DecryptionError::MissingMessageKey(message.chain_index))
            }
        } else {
            let mut ratchet = self.hkdf_ratchet.clone();
            let mut skipped_keys = MessageKeyStore::new();

            // Advance the ratchet up to our desired point, materializing the
            // message keys we skip over on the way, though only as many as
            // the store can hold.
            while ratchet.chain_index() < message.chain_index {
                if message.chain_index - ratchet.chain_index() > MAX_MESSAGE_KEYS as u64 {
                    ratchet.advance();
                } else {
                    let key = ratchet.create_message_key();
                    skipped_keys.push(key);
                }
            }

            // Only now create the message key we actually need.
            let message_key = ratchet.create_message_key();
            let plaintext = message_key.decrypt(message)?;

            // The MAC checked out, so the advancement is committed.
            self.hkdf_ratchet = ratchet;
            self.skipped_message_keys.merge(skipped_keys);

            Ok(plaintext)
        }
    }

    pub fn ratchet_key(&self) -> RemoteRatchetKey {
        self.ratchet_key
    }

    pub fn belongs_to(&self, ratchet_key: &RemoteRatchetKey) -> bool {
        &self.ratchet_key == ratchet_key
    }

    pub fn insert_message_key(&mut self, message_key: RemoteMessageKey) {
        self.skipped_message_keys.push(message_key)
    }

    pub fn chain_key(&self) -> &RemoteChainKey {
        &self.hkdf_ratchet
    }

    pub fn message_keys(&self) -> impl Iterator<Item = &RemoteMessageKey> {
        self.skipped_message_keys.inner.iter()
    }

    pub fn chain_index(&self) -> u64 {
        self.hkdf_ratchet.chain_index()
    }
}
