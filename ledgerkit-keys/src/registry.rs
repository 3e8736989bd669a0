//! Seed registry.
//!
//! Owns every seed a wallet knows about: creation, idempotent import, the
//! per-seed usage index, and the default-seed pointer. Persistence goes
//! through the configured `RecordStore`; a single mutex guards the cache so
//! a seed is loaded from storage at most once no matter how many threads ask
//! for it at the same time.
//!
//! # Thread Safety
//!
//! All mutating operations run inside one critical section: check, mutate,
//! persist, then release. `get_or_create_default_seed` in particular cannot
//! race itself into two default seeds. Publishes happen after the lock is
//! released; the bus is fire-and-forget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use zeroize::Zeroizing;

use ledgerkit_lib::{NotificationBus, RecordStore, SeedId, SEED_EVENT_TOPIC};

use crate::hd::{self, Curve, HdKey, KeyRole};
use crate::seed::{Seed, SeedError, SeedLanguage, SeedStrength, SeedStyle, StoredSeed};

const SEED_PREFIX: &str = "seeds/";
const DEFAULT_SEED_KEY: &str = "seeds/_default";

pub struct SeedRegistry {
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn NotificationBus>,
    cache: Mutex<HashMap<SeedId, Seed>>,
}

impl SeedRegistry {
    pub fn new(store: Arc<dyn RecordStore>, bus: Arc<dyn NotificationBus>) -> Self {
        Self {
            store,
            bus,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Create and persist a fresh seed of the requested shape.
    pub fn new_seed(
        &self,
        style: SeedStyle,
        language: SeedLanguage,
        strength: SeedStrength,
    ) -> Result<SeedId, SeedError> {
        let id = {
            let mut cache = self.lock_cache();
            let seed = Seed::generate(style, language, strength)?;
            let id = seed.id().clone();
            self.persist(&seed)?;
            cache.insert(id.clone(), seed);
            id
        };
        tracing::debug!(seed = %id, "created seed");
        self.publish(&id);
        Ok(id)
    }

    /// Import a mnemonic. Importing material that already exists returns the
    /// existing id and leaves the stored record untouched.
    pub fn import_seed(
        &self,
        words: &str,
        passphrase: &str,
        style: SeedStyle,
        language: SeedLanguage,
    ) -> Result<SeedId, SeedError> {
        let candidate = Seed::from_words(words, passphrase, style, language)?;
        self.import(candidate)
    }

    /// Import raw entropy. Idempotent in the same way as `import_seed`.
    pub fn import_raw(&self, entropy: &[u8]) -> Result<SeedId, SeedError> {
        let candidate = Seed::from_entropy(entropy)?;
        self.import(candidate)
    }

    fn import(&self, candidate: Seed) -> Result<SeedId, SeedError> {
        let (id, created) = {
            let mut cache = self.lock_cache();
            let id = candidate.id().clone();
            if self.load_into(&mut cache, &id)?.is_some() {
                (id, false)
            } else {
                self.persist(&candidate)?;
                cache.insert(id.clone(), candidate);
                (id, true)
            }
        };
        if created {
            tracing::debug!(seed = %id, "imported seed");
            self.publish(&id);
        }
        Ok(id)
    }

    /// Derive the HD key at `path` for `seed`. Pure read; never touches the
    /// usage index.
    pub fn get_hd_key(
        &self,
        seed: &SeedId,
        curve: Curve,
        path: &[u32],
        role: KeyRole,
        version: u32,
    ) -> Result<HdKey, SeedError> {
        let master = {
            let mut cache = self.lock_cache();
            let seed = self
                .load_into(&mut cache, seed)?
                .ok_or_else(|| SeedError::NotFound(seed.to_string()))?;
            seed.master_seed()?
        };
        hd::derive(&master, curve, path, role, version)
            .map_err(|e| SeedError::Derivation(e.to_string()))
    }

    /// Raise the seed's usage index to `index`. Lower or equal values are a
    /// successful no-op; the stored maximum never decreases.
    pub fn update_index(&self, seed: &SeedId, index: u64) -> Result<(), SeedError> {
        let changed = {
            let mut cache = self.lock_cache();
            let current = self
                .load_into(&mut cache, seed)?
                .ok_or_else(|| SeedError::NotFound(seed.to_string()))?
                .index();
            if index > current {
                let entry = cache
                    .get_mut(seed)
                    .ok_or_else(|| SeedError::NotFound(seed.to_string()))?;
                entry.set_index(index);
                let snapshot = entry.clone();
                // Persist before the lock is released so a reader that
                // observes the new maximum can never outrun storage.
                self.persist(&snapshot)?;
                true
            } else {
                false
            }
        };
        if changed {
            self.publish(seed);
        }
        Ok(())
    }

    /// Current usage index of a seed.
    pub fn index(&self, seed: &SeedId) -> Result<u64, SeedError> {
        let mut cache = self.lock_cache();
        let seed = self
            .load_into(&mut cache, seed)?
            .ok_or_else(|| SeedError::NotFound(seed.to_string()))?;
        Ok(seed.index())
    }

    /// Fetch the default seed id, creating a seed for it exactly once if the
    /// wallet has none.
    pub fn get_or_create_default_seed(
        &self,
        style: SeedStyle,
        language: SeedLanguage,
        strength: SeedStrength,
    ) -> Result<SeedId, SeedError> {
        let (id, created) = {
            let mut cache = self.lock_cache();
            let existing = match self.default_pointer()? {
                Some(id) => {
                    if self.load_into(&mut cache, &id)?.is_some() {
                        Some(id)
                    } else {
                        tracing::warn!(seed = %id, "default seed pointer is dangling");
                        None
                    }
                }
                None => None,
            };
            match existing {
                Some(id) => (id, false),
                None => {
                    let seed = Seed::generate(style, language, strength)?;
                    let id = seed.id().clone();
                    self.persist(&seed)?;
                    self.store
                        .put(DEFAULT_SEED_KEY, id.as_str().as_bytes())
                        .map_err(|e| SeedError::Storage(e.to_string()))?;
                    cache.insert(id.clone(), seed);
                    (id, true)
                }
            }
        };
        if created {
            tracing::debug!(seed = %id, "created default seed");
            self.publish(&id);
        }
        Ok(id)
    }

    /// The default seed id, if one has been set.
    pub fn default_seed(&self) -> Result<Option<SeedId>, SeedError> {
        let _cache = self.lock_cache();
        self.default_pointer()
    }

    pub fn exists(&self, seed: &SeedId) -> bool {
        let mut cache = self.lock_cache();
        matches!(self.load_into(&mut cache, seed), Ok(Some(_)))
    }

    /// Mnemonic words of a seed. Empty for legacy seeds.
    pub fn words(&self, seed: &SeedId) -> Result<Zeroizing<String>, SeedError> {
        let mut cache = self.lock_cache();
        let seed = self
            .load_into(&mut cache, seed)?
            .ok_or_else(|| SeedError::NotFound(seed.to_string()))?;
        Ok(Zeroizing::new(seed.words().to_string()))
    }

    /// Passphrase of a seed. Empty when none was supplied.
    pub fn passphrase(&self, seed: &SeedId) -> Result<Zeroizing<String>, SeedError> {
        let mut cache = self.lock_cache();
        let seed = self
            .load_into(&mut cache, seed)?
            .ok_or_else(|| SeedError::NotFound(seed.to_string()))?;
        Ok(Zeroizing::new(seed.passphrase().to_string()))
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<SeedId, Seed>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load-or-insert under the held cache lock. At most one caller ever
    /// deserializes a given seed from storage.
    fn load_into<'a>(
        &self,
        cache: &'a mut HashMap<SeedId, Seed>,
        id: &SeedId,
    ) -> Result<Option<&'a Seed>, SeedError> {
        if !cache.contains_key(id) {
            let key = format!("{SEED_PREFIX}{id}");
            let Some(bytes) = self
                .store
                .get(&key)
                .map_err(|e| SeedError::Storage(e.to_string()))?
            else {
                return Ok(None);
            };
            let stored: StoredSeed = serde_json::from_slice(&bytes)
                .map_err(|e| SeedError::Serialization(e.to_string()))?;
            cache.insert(id.clone(), Seed::try_from(stored)?);
        }
        Ok(cache.get(id))
    }

    fn persist(&self, seed: &Seed) -> Result<(), SeedError> {
        let key = format!("{SEED_PREFIX}{}", seed.id());
        let bytes = serde_json::to_vec(&StoredSeed::from(seed))
            .map_err(|e| SeedError::Serialization(e.to_string()))?;
        self.store
            .put(&key, &bytes)
            .map_err(|e| SeedError::Storage(e.to_string()))
    }

    fn default_pointer(&self) -> Result<Option<SeedId>, SeedError> {
        let Some(bytes) = self
            .store
            .get(DEFAULT_SEED_KEY)
            .map_err(|e| SeedError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };
        let id = String::from_utf8(bytes)
            .map_err(|e| SeedError::Serialization(e.to_string()))?;
        Ok(Some(SeedId::new(id)))
    }

    fn publish(&self, id: &SeedId) {
        self.bus.publish(SEED_EVENT_TOPIC, id.as_str().as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkit_lib::test_utils::MemoryBus;
    use ledgerkit_lib::{FileRecordStore, MemoryRecordStore};

    fn registry() -> (SeedRegistry, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let registry = SeedRegistry::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::clone(&bus) as Arc<dyn NotificationBus>,
        );
        (registry, bus)
    }

    #[test]
    fn test_new_seed_is_persisted_and_announced() {
        let (registry, bus) = registry();
        let id = registry
            .new_seed(
                SeedStyle::Bip39,
                SeedLanguage::English,
                SeedStrength::Words24,
            )
            .unwrap();
        assert!(registry.exists(&id));
        assert_eq!(registry.words(&id).unwrap().split_whitespace().count(), 24);
        assert_eq!(bus.topic_messages(SEED_EVENT_TOPIC).len(), 1);
    }

    #[test]
    fn test_import_is_idempotent() {
        let (registry, bus) = registry();
        let first = registry.import_raw(&[9u8; 32]).unwrap();
        let second = registry.import_raw(&[9u8; 32]).unwrap();
        assert_eq!(first, second);
        // Only the first import announces anything.
        assert_eq!(bus.topic_messages(SEED_EVENT_TOPIC).len(), 1);
    }

    #[test]
    fn test_exported_words_import_to_same_id() {
        let (registry, _) = registry();
        let id = registry
            .new_seed(
                SeedStyle::Bip39,
                SeedLanguage::English,
                SeedStrength::Words12,
            )
            .unwrap();
        let words = registry.words(&id).unwrap();
        let reimported = registry
            .import_seed(&words, "", SeedStyle::Bip39, SeedLanguage::English)
            .unwrap();
        assert_eq!(reimported, id);
    }

    #[test]
    fn test_update_index_is_monotonic() {
        let (registry, _) = registry();
        let id = registry.import_raw(&[4u8; 32]).unwrap();
        registry.update_index(&id, 5).unwrap();
        registry.update_index(&id, 3).unwrap();
        assert_eq!(registry.index(&id).unwrap(), 5);
        registry.update_index(&id, 9).unwrap();
        assert_eq!(registry.index(&id).unwrap(), 9);
    }

    #[test]
    fn test_index_survives_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RecordStore> =
            Arc::new(FileRecordStore::new(dir.path()).unwrap());
        let id = {
            let registry =
                SeedRegistry::new(Arc::clone(&store), Arc::new(MemoryBus::new()));
            let id = registry.import_raw(&[6u8; 24]).unwrap();
            registry.update_index(&id, 42).unwrap();
            id
        };
        // Fresh registry over the same files, empty cache.
        let registry = SeedRegistry::new(store, Arc::new(MemoryBus::new()));
        assert_eq!(registry.index(&id).unwrap(), 42);
    }

    #[test]
    fn test_default_seed_created_exactly_once() {
        let (registry, _) = registry();
        assert!(registry.default_seed().unwrap().is_none());
        let first = registry
            .get_or_create_default_seed(
                SeedStyle::Bip39,
                SeedLanguage::English,
                SeedStrength::Words12,
            )
            .unwrap();
        let second = registry
            .get_or_create_default_seed(
                SeedStyle::Bip39,
                SeedLanguage::English,
                SeedStrength::Words12,
            )
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.default_seed().unwrap(), Some(first));
    }

    #[test]
    fn test_concurrent_default_seed_single_winner() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry
                    .get_or_create_default_seed(
                        SeedStyle::Bip39,
                        SeedLanguage::English,
                        SeedStrength::Words12,
                    )
                    .unwrap()
            }));
        }
        let ids: Vec<SeedId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_dangling_default_pointer_is_replaced() {
        let store = Arc::new(MemoryRecordStore::new());
        // A pointer whose seed record was lost.
        store.put(DEFAULT_SEED_KEY, b"no-such-seed").unwrap();
        let registry = SeedRegistry::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::new(MemoryBus::new()),
        );

        let id = registry
            .get_or_create_default_seed(
                SeedStyle::Bip39,
                SeedLanguage::English,
                SeedStrength::Words12,
            )
            .unwrap();

        assert_ne!(id.as_str(), "no-such-seed");
        assert!(registry.exists(&id));
        assert_eq!(registry.default_seed().unwrap(), Some(id));
    }

    #[test]
    fn test_get_hd_key_for_missing_seed() {
        let (registry, _) = registry();
        let err = registry
            .get_hd_key(
                &SeedId::new("nope"),
                Curve::Secp256k1,
                &[],
                KeyRole::Sign,
                1,
            )
            .unwrap_err();
        assert!(matches!(err, SeedError::NotFound(_)));
    }

    #[test]
    fn test_get_hd_key_is_deterministic() {
        let (registry, _) = registry();
        let id = registry.import_raw(&[2u8; 32]).unwrap();
        let a = registry
            .get_hd_key(&id, Curve::Secp256k1, &[crate::hd::HARDENED, 1], KeyRole::Sign, 1)
            .unwrap();
        let b = registry
            .get_hd_key(&id, Curve::Secp256k1, &[crate::hd::HARDENED, 1], KeyRole::Sign, 1)
            .unwrap();
        assert_eq!(a.public, b.public);
        assert_eq!(a.private.as_slice(), b.private.as_slice());
    }
}
