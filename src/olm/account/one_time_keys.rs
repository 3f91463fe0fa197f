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

use std::collections::{BTreeMap, HashMap};

use subtle::ConstantTimeEq;

use super::PUBLIC_MAX_ONE_TIME_KEYS;
use crate::{
    types::{Curve25519SecretKey, KeyId},
    Curve25519PublicKey,
};

pub(super) struct OneTimeKeys {
    pub next_key_id: u64,
    pub unpublished_public_keys: BTreeMap<KeyId, Curve25519PublicKey>,
    pub private_keys: BTreeMap<KeyId, Curve25519SecretKey>,
    pub key_ids_by_key: HashMap<Curve25519PublicKey, KeyId>,
}

/// The result of a one-time key generation operation.
pub struct OneTimeKeyGenerationResult {
    /// The public part of the one-time keys that were newly generated.
    pub created: Vec<Curve25519PublicKey>,
    /// The public part of the one-time keys that had to be removed to make
    /// space for the new ones.
    pub removed: Vec<Curve25519PublicKey>,
}

impl OneTimeKeys {
    /// The number of private one-time keys we keep around, well above the
    /// amount we advertise so pre-key messages that are still in flight when
    /// keys get replaced remain decryptable.
    const MAX_ONE_TIME_KEYS: usize = 100 * PUBLIC_MAX_ONE_TIME_KEYS;

    pub fn new() -> Self {
        Self {
            next_key_id: 0,
            unpublished_public_keys: Default::default(),
            private_keys: Default::default(),
            key_ids_by_key: Default::default(),
        }
    }

    pub fn mark_as_published(&mut self) {
        self.unpublished_public_keys.clear();
    }

    /// Find the secret part of the one-time key with the given public part.
    ///
    /// The lookup compares the given key against every stored key in
    /// constant time, without an early exit.
    pub fn get_secret_key(&self, public_key: &Curve25519PublicKey) -> Option<&Curve25519SecretKey> {
        let mut key_id = None;

        for (candidate, candidate_key_id) in &self.key_ids_by_key {
            if bool::from(candidate.as_bytes().ct_eq(public_key.as_bytes())) {
                key_id = Some(*candidate_key_id);
            }
        }

        key_id.and_then(|key_id| self.private_keys.get(&key_id))
    }

    pub fn remove_secret_key(
        &mut self,
        public_key: &Curve25519PublicKey,
    ) -> Option<Curve25519SecretKey> {
        self.key_ids_by_key.remove(public_key).and_then(|key_id| {
            self.unpublished_public_keys.remove(&key_id);
            self.private_keys.remove(&key_id)
        })
    }

    pub fn is_secret_key_published(&self, key_id: &KeyId) -> bool {
        !self.unpublished_public_keys.contains_key(key_id)
    }

    pub const fn secret_keys(&self) -> &BTreeMap<KeyId, Curve25519SecretKey> {
        &self.private_keys
    }

    fn remove_one_key(&mut self, key_id: KeyId) -> Option<Curve25519PublicKey> {
        self.unpublished_public_keys.remove(&key_id);

        self.private_keys.remove(&key_id).map(|private_key| {
            let public_key = Curve25519PublicKey::from(&private_key);
            self.key_ids_by_key.remove(&public_key);

            public_key
        })
    }

    pub(super) fn insert_secret_key(
        &mut self,
        key_id: KeyId,
        key: Curve25519SecretKey,
        published: bool,
    ) -> (Curve25519PublicKey, Option<Curve25519PublicKey>) {
        self.insert_secret_key_with_floor(key_id, key, published, key_id)
    }

    fn insert_secret_key_with_floor(
        &mut self,
        key_id: KeyId,
        key: Curve25519SecretKey,
        published: bool,
        eviction_floor: KeyId,
    ) -> (Curve25519PublicKey, Option<Curve25519PublicKey>) {
        // If we hit the max number of one-time keys we'd like to keep, first
        // remove one before we insert the new one. A stale unpublished key
        // from an earlier generation batch goes first, it was never uploaded
        // anywhere; the oldest key overall otherwise.
        let removed = if self.private_keys.len() >= Self::MAX_ONE_TIME_KEYS {
            let oldest_key_id = self
                .unpublished_public_keys
                .keys()
                .next()
                .filter(|id| **id < eviction_floor)
                .or_else(|| self.private_keys.keys().next())
                .copied();

            oldest_key_id.and_then(|key_id| self.remove_one_key(key_id))
        } else {
            None
        };

        let public_key = Curve25519PublicKey::from(&key);

        self.private_keys.insert(key_id, key);
        self.key_ids_by_key.insert(public_key, key_id);

        if !published {
            self.unpublished_public_keys.insert(key_id, public_key);
        }

        (public_key, removed)
    }

    fn generate_one_time_key(
        &mut self,
        batch_start: KeyId,
    ) -> (Curve25519PublicKey, Option<Curve25519PublicKey>) {
        let key_id = KeyId(self.next_key_id);
        let key = Curve25519SecretKey::new();

        self.insert_secret_key_with_floor(key_id, key, false, batch_start)
    }

    pub fn generate(&mut self, count: usize) -> OneTimeKeyGenerationResult {
        let batch_start = KeyId(self.next_key_id);

        let mut removed_keys = Vec::new();
        let mut created_keys = Vec::new();

        for _ in 0..count {
            let (created, removed) = self.generate_one_time_key(batch_start);

            created_keys.push(created);
            if let Some(removed) = removed {
                removed_keys.push(removed);
            }

            self.next_key_id = self.next_key_id.wrapping_add(1);
        }

        OneTimeKeyGenerationResult { created: created_keys, removed: removed_keys }
    }
}

#[cfg(test)]
mod test {
    use super::OneTimeKeys;
    use crate::types::KeyId;

    #[test]
    fn store_limit() {
        let mut store = OneTimeKeys::new();

        assert!(store.private_keys.is_empty());

        store.generate(OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.unpublished_public_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.private_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.key_ids_by_key.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);

        store
            .private_keys
            .keys()
            .for_each(|key_id| assert!(!store.is_secret_key_published(key_id)));

        store.mark_as_published();
        assert!(store.unpublished_public_keys.is_empty());
        assert_eq!(store.private_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.key_ids_by_key.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);

        store.private_keys.keys().for_each(|key_id| assert!(store.is_secret_key_published(key_id)));

        let oldest_key_id =
            store.private_keys.keys().next().copied().expect("Couldn't get the first key ID");
        assert_eq!(oldest_key_id, KeyId(0));

        store.generate(10);
        assert_eq!(store.unpublished_public_keys.len(), 10);
        assert_eq!(store.private_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.key_ids_by_key.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);

        let oldest_key_id =
            store.private_keys.keys().next().copied().expect("Couldn't get the first key ID");

        assert_eq!(oldest_key_id, KeyId(10));
    }

    #[test]
    fn unpublished_keys_are_evicted_first() {
        let mut store = OneTimeKeys::new();

        store.generate(OneTimeKeys::MAX_ONE_TIME_KEYS - 1);
        store.mark_as_published();

        // The store has space for exactly one more key. After two more
        // generations the first generation's key, the only unpublished one at
        // that point, should be gone while all the published ones survive.
        store.generate(1);
        let unpublished_key_id =
            *store.unpublished_public_keys.keys().next().expect("We just generated a key");

        store.generate(1);

        assert!(!store.private_keys.contains_key(&unpublished_key_id));
        assert!(store.private_keys.contains_key(&KeyId(0)));
    }

    #[test]
    fn constant_time_lookup_finds_the_key() {
        let mut store = OneTimeKeys::new();

        let result = store.generate(10);
        let needle = result.created[7];

        let secret = store.get_secret_key(&needle).expect("The key we generated should be found");
        assert_eq!(crate::Curve25519PublicKey::from(secret), needle);

        store.remove_secret_key(&needle);
        assert!(store.get_secret_key(&needle).is_none());
    }
}
