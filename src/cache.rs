//! Content-addressed cache for decoded tokens.
//!
//! Decoding is a pure function of (token, model, rules, k), so results are
//! addressed by a digest over exactly those four inputs. The cache
//! guarantees **at-most-one concurrent computation per key**: when the same
//! common token shows up on many workers at once, one thread runs the
//! Viterbi pass and the rest block on its slot and receive the same shared
//! result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use sha2::{Digest, Sha256};

use crate::decode::KBestItem;

/// The content address of one decoding: SHA-256 over the token, the model
/// fingerprint, the rule-set fingerprint, and k.
pub fn cache_key(word: &str, hmm_fingerprint: &str, rules_fingerprint: &str, k: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(word.as_bytes());
    hasher.update([0x1f]);
    hasher.update(hmm_fingerprint.as_bytes());
    hasher.update([0x1f]);
    hasher.update(rules_fingerprint.as_bytes());
    hasher.update([0x1f]);
    hasher.update(k.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

type Slot = Arc<OnceLock<Arc<Vec<KBestItem>>>>;

/// Keyed store of finished decodings with per-key in-flight gating.
#[derive(Debug, Default)]
pub struct DecodingCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl DecodingCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `key`, or run `compute` to fill it.
    ///
    /// Concurrent callers with the same key block on the one in-flight
    /// computation rather than duplicating it.
    pub fn get_or_compute(
        &self,
        key: &str,
        compute: impl FnOnce() -> Vec<KBestItem>,
    ) -> Arc<Vec<KBestItem>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        slot.get_or_init(|| Arc::new(compute())).clone()
    }

    /// Look up a finished result without computing.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<KBestItem>>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of keys seen (including any still in flight).
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if no key was ever requested.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
