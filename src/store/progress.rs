//! Unlock and completion progress
//!
//! Two persisted records: a monotonically-increasing unlock counter for
//! default/local play, and a map of per-level best results for remote play.
//! Loading is tolerant - missing or unparsable data yields the zero state so
//! a wiped or corrupted store never blocks initialization. Write failures are
//! logged and swallowed; the in-memory state stays valid for the session.

use super::{keys, KvStore, StoreError};
use crate::remote::CompletionOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unlock progress for the default/local level sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalProgress {
    unlocked_levels: u32,
}

impl Default for LocalProgress {
    /// Zero state: only the first level is playable
    fn default() -> Self {
        Self { unlocked_levels: 1 }
    }
}

/// Best observed results for one remote level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCompletion {
    pub completed: bool,
    pub best_time: f64,
    pub best_deaths: u32,
}

/// Persisted unlock counters, remote completion records, the local-to-remote
/// id map, and the player's identity strings.
#[derive(Debug)]
pub struct ProgressStore {
    store: KvStore,
    local: LocalProgress,
    remote: BTreeMap<String, RemoteCompletion>,
    remote_ids: BTreeMap<u32, String>,
}

impl ProgressStore {
    /// Load progress from the store, falling back to the zero state on any
    /// missing or unparsable record
    pub fn load(store: KvStore) -> Self {
        let local = match store.read_string(keys::PROGRESS) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                eprintln!("Progress: unparsable unlock record, starting fresh: {}", e);
                LocalProgress::default()
            }),
            Err(StoreError::NotFound(_)) => LocalProgress::default(),
            Err(e) => {
                eprintln!("Progress: failed to read unlock record: {}", e);
                LocalProgress::default()
            }
        };

        let remote = match store.read_string(keys::REMOTE_PROGRESS) {
            Ok(text) => {
                // Stored as an explicit list of [id, record] pairs; a flat
                // pair list round-trips through any text store, unlike
                // non-string-keyed maps
                match serde_json::from_str::<Vec<(String, RemoteCompletion)>>(&text) {
                    Ok(pairs) => pairs.into_iter().collect(),
                    Err(e) => {
                        eprintln!("Progress: unparsable remote record, starting fresh: {}", e);
                        BTreeMap::new()
                    }
                }
            }
            Err(_) => BTreeMap::new(),
        };

        let remote_ids = match store.read_string(keys::REMOTE_ID_MAP) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };

        Self {
            store,
            local,
            remote,
            remote_ids,
        }
    }

    /// Number of unlocked default/local levels. Never decreases.
    pub fn unlocked_levels(&self) -> u32 {
        self.local.unlocked_levels
    }

    /// Record completion of default/local level `index`
    ///
    /// Unlocks exactly the next level. Repeated completions of levels that
    /// are already behind the unlock frontier are no-ops.
    pub fn record_local_completion(&mut self, index: usize) {
        let index = index as u32;
        if index + 1 >= self.local.unlocked_levels {
            self.local.unlocked_levels = index + 2;
            self.persist_local();
        }
    }

    /// Record a remote run, merging into the existing best record
    ///
    /// Time and deaths improve independently: a new run may better one
    /// without bettering the other.
    pub fn record_remote_completion(&mut self, id: &str, outcome: &CompletionOutcome) {
        let record = self
            .remote
            .entry(id.to_string())
            .and_modify(|r| {
                r.completed = true;
                r.best_time = r.best_time.min(outcome.time);
                r.best_deaths = r.best_deaths.min(outcome.deaths);
            })
            .or_insert(RemoteCompletion {
                completed: true,
                best_time: outcome.time,
                best_deaths: outcome.deaths,
            });
        debug_assert!(record.completed);
        self.persist_remote();
    }

    /// Best results for a remote level, if it was ever completed
    pub fn remote_completion(&self, id: &str) -> Option<&RemoteCompletion> {
        self.remote.get(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local-to-remote id map (update vs. create on re-save)
    // ─────────────────────────────────────────────────────────────────────────

    /// Remote id previously assigned to local level `index`, if any
    pub fn remote_id_for(&self, index: usize) -> Option<&str> {
        self.remote_ids.get(&(index as u32)).map(|s| s.as_str())
    }

    /// Remember the remote id assigned to local level `index`
    pub fn set_remote_id(&mut self, index: usize, id: String) {
        self.remote_ids.insert(index as u32, id);
        self.persist_remote_ids();
    }

    /// Drop the mapping for a deleted local level and shift later indices down
    pub fn forget_local_level(&mut self, index: usize) {
        let index = index as u32;
        let shifted: BTreeMap<u32, String> = std::mem::take(&mut self.remote_ids)
            .into_iter()
            .filter(|(i, _)| *i != index)
            .map(|(i, id)| if i > index { (i - 1, id) } else { (i, id) })
            .collect();
        self.remote_ids = shifted;
        self.persist_remote_ids();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Author display name, if one was ever set. Self-reported, not verified.
    pub fn author_name(&self) -> Option<String> {
        self.store.read_string(keys::AUTHOR_NAME).ok()
    }

    /// Set the author display name
    pub fn set_author_name(&self, name: &str) {
        if let Err(e) = self.store.write_string(keys::AUTHOR_NAME, name) {
            eprintln!("Progress: failed to persist author name: {}", e);
        }
    }

    /// Anonymous user identifier, generated once and reused
    pub fn user_id(&self) -> String {
        if let Ok(id) = self.store.read_string(keys::USER_ID) {
            if !id.is_empty() {
                return id;
            }
        }
        let id = generate_user_id();
        if let Err(e) = self.store.write_string(keys::USER_ID, &id) {
            eprintln!("Progress: failed to persist user id: {}", e);
        }
        id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence (immediate, failures swallowed)
    // ─────────────────────────────────────────────────────────────────────────

    fn persist_local(&self) {
        match serde_json::to_string(&self.local) {
            Ok(text) => {
                if let Err(e) = self.store.write_string(keys::PROGRESS, &text) {
                    eprintln!("Progress: failed to persist unlock record: {}", e);
                }
            }
            Err(e) => eprintln!("Progress: failed to encode unlock record: {}", e),
        }
    }

    fn persist_remote(&self) {
        let pairs: Vec<(&String, &RemoteCompletion)> = self.remote.iter().collect();
        match serde_json::to_string(&pairs) {
            Ok(text) => {
                if let Err(e) = self.store.write_string(keys::REMOTE_PROGRESS, &text) {
                    eprintln!("Progress: failed to persist remote record: {}", e);
                }
            }
            Err(e) => eprintln!("Progress: failed to encode remote record: {}", e),
        }
    }

    fn persist_remote_ids(&self) {
        match serde_json::to_string(&self.remote_ids) {
            Ok(text) => {
                if let Err(e) = self.store.write_string(keys::REMOTE_ID_MAP, &text) {
                    eprintln!("Progress: failed to persist id map: {}", e);
                }
            }
            Err(e) => eprintln!("Progress: failed to encode id map: {}", e),
        }
    }
}

/// Generate a random anonymous user identifier
fn generate_user_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("user_{}", suffix)
}
