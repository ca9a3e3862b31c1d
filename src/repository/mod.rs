//! Level repository
//!
//! Single source of truth for "which level is active" and "what is in it",
//! across the three level sources: bundled defaults, the locally authored
//! library, and the remote community service. Remote access is fire-and-poll:
//! requests go out on worker threads and results are applied by [`poll`],
//! each behind a stale-response guard - a result is only applied if the
//! context it was issued for (active source, requested id, epoch) is still
//! current. The repository stays fully usable on default levels even when
//! the store and the service are both unreachable.
//!
//! [`poll`]: LevelRepository::poll

use crate::level::defaults::{default_levels, DefaultLevel};
use crate::level::library::{parse_library, serialize_library};
use crate::level::{validate_local_level, LevelDescriptor, LocalLevel, StartPosition, TileGrid};
use crate::remote::pending::{self, RemoteOp};
use crate::remote::{
    CompletionOutcome, FeaturedLevels, HttpRemoteService, LevelPage, LevelUpload, ListQuery,
    RemoteError, RemoteLevelService, SavedLevel,
};
use crate::store::progress::ProgressStore;
use crate::store::{keys, KvStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;

/// The three level origins. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    Default,
    Local,
    Remote,
}

impl LevelSource {
    /// Human-readable label for the source
    pub fn label(&self) -> &'static str {
        match self {
            LevelSource::Default => "Default",
            LevelSource::Local => "Local",
            LevelSource::Remote => "Community",
        }
    }
}

/// Descriptor-shaped info about the active level, per source
///
/// Author/rating/plays only exist for remote levels, so each variant carries
/// only the data meaningful for its source.
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentLevelInfo {
    Default {
        index: usize,
        name: String,
        start_position: StartPosition,
    },
    Local {
        index: usize,
        name: String,
        start_position: StartPosition,
    },
    Remote {
        id: String,
        name: String,
        start_position: StartPosition,
        author: String,
        rating: f32,
        plays: u32,
    },
}

impl CurrentLevelInfo {
    pub fn name(&self) -> &str {
        match self {
            CurrentLevelInfo::Default { name, .. } => name,
            CurrentLevelInfo::Local { name, .. } => name,
            CurrentLevelInfo::Remote { name, .. } => name,
        }
    }

    pub fn start_position(&self) -> StartPosition {
        match self {
            CurrentLevelInfo::Default { start_position, .. } => *start_position,
            CurrentLevelInfo::Local { start_position, .. } => *start_position,
            CurrentLevelInfo::Remote { start_position, .. } => *start_position,
        }
    }
}

/// Side channel distinguishing "service unreachable" from "zero levels exist"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// No service was injected
    NotConfigured,
    /// No remote call has completed yet
    Unknown,
    /// Last remote call succeeded
    Available,
    /// Last remote call failed
    Unavailable,
}

/// Completed asynchronous work, reported by [`LevelRepository::poll`]
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryEvent {
    ListingLoaded { count: usize, has_more: bool },
    ListingFailed(RemoteError),
    FeaturedLoaded,
    FeaturedFailed(RemoteError),
    LevelLoaded { id: String },
    LevelLoadFailed { id: String, error: RemoteError },
    LevelSaved { index: usize, id: String },
    LevelSaveFailed { index: usize, error: RemoteError },
}

/// Where the repository keeps its data and which service it talks to
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// Base directory for the key-value store
    pub data_dir: PathBuf,
    /// Community service base URL; `None` runs fully offline
    pub remote_url: Option<String>,
}

struct PendingLevelLoad {
    op: RemoteOp<LevelDescriptor>,
    id: String,
    epoch: u64,
}

struct PendingRemoteSave {
    op: RemoteOp<SavedLevel>,
    index: usize,
    // Captured so a save result is dropped if the level was deleted/replaced
    name: String,
}

/// Aggregates the three level sources behind one query interface
pub struct LevelRepository {
    defaults: Vec<DefaultLevel>,
    local_levels: Vec<LocalLevel>,
    /// Session cache of remote descriptors; never persisted verbatim
    remote_levels: Vec<LevelDescriptor>,
    featured: Option<FeaturedLevels>,

    source: LevelSource,
    current_index: usize,
    current_remote_id: Option<String>,
    /// Bumped on source switches and remote-level requests; pending results
    /// issued under an older epoch are stale
    epoch: u64,

    store: KvStore,
    progress: ProgressStore,
    service: Option<Arc<dyn RemoteLevelService>>,
    remote_status: RemoteStatus,

    pending_listing: Option<RemoteOp<LevelPage>>,
    pending_featured: Option<RemoteOp<FeaturedLevels>>,
    pending_level: Option<PendingLevelLoad>,
    pending_saves: Vec<PendingRemoteSave>,
    /// Best-effort completion/rating forwards; failures are only logged
    pending_acks: Vec<RemoteOp<()>>,
}

impl LevelRepository {
    /// Create a repository over an explicit store and service
    pub fn new(store: KvStore, service: Option<Arc<dyn RemoteLevelService>>) -> Self {
        let remote_status = if service.is_some() {
            RemoteStatus::Unknown
        } else {
            RemoteStatus::NotConfigured
        };
        let progress = ProgressStore::load(store.clone());
        Self {
            defaults: Vec::new(),
            local_levels: Vec::new(),
            remote_levels: Vec::new(),
            featured: None,
            source: LevelSource::Default,
            current_index: 0,
            current_remote_id: None,
            epoch: 0,
            store,
            progress,
            service,
            remote_status,
            pending_listing: None,
            pending_featured: None,
            pending_level: None,
            pending_saves: Vec::new(),
            pending_acks: Vec::new(),
        }
    }

    /// Create a repository from a config, wiring up the HTTP service when a
    /// remote URL is present
    pub fn from_config(config: RepositoryConfig) -> Self {
        let store = KvStore::with_base_dir(config.data_dir);
        let service: Option<Arc<dyn RemoteLevelService>> = config
            .remote_url
            .map(|url| Arc::new(HttpRemoteService::new(url)) as Arc<dyn RemoteLevelService>);
        Self::new(store, service)
    }

    /// Load defaults and the local library, then fire the initial remote
    /// listing request
    ///
    /// Never blocks on the remote outcome; the repository is usable with
    /// default/local levels immediately.
    pub fn initialize(&mut self) {
        self.defaults = default_levels();

        self.local_levels = match self.store.read(keys::LEVEL_LIBRARY) {
            Ok(bytes) => match parse_library(&bytes) {
                Ok(levels) => levels,
                Err(e) => {
                    eprintln!("Repository: unreadable level library, starting empty: {}", e);
                    Vec::new()
                }
            },
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => {
                eprintln!("Repository: failed to read level library: {}", e);
                Vec::new()
            }
        };

        self.request_remote_listing(ListQuery::first_page());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Source switching and current-level queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Switch the active level source
    ///
    /// Default/Local reset the index to 0; Remote clears the selected id.
    /// An index from one source is never carried into another.
    pub fn select_source(&mut self, source: LevelSource) {
        self.source = source;
        self.epoch += 1;
        match source {
            LevelSource::Default | LevelSource::Local => self.current_index = 0,
            LevelSource::Remote => self.current_remote_id = None,
        }
    }

    pub fn source(&self) -> LevelSource {
        self.source
    }

    /// Select level `index` within the active Default/Local source
    ///
    /// Returns false (leaving the selection unchanged) for Remote, for an
    /// out-of-range index, or for a level that is still locked.
    pub fn set_current_index(&mut self, index: usize) -> bool {
        if self.source == LevelSource::Remote {
            return false;
        }
        if index >= self.level_count() || !self.is_unlocked(index) {
            return false;
        }
        self.current_index = index;
        true
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Number of levels in the active source
    pub fn level_count(&self) -> usize {
        match self.source {
            LevelSource::Default => self.defaults.len(),
            LevelSource::Local => self.local_levels.len(),
            LevelSource::Remote => self.remote_levels.len(),
        }
    }

    /// Grid of the active level, if one is selected
    pub fn current_level(&self) -> Option<&TileGrid> {
        match self.source {
            LevelSource::Default => self.defaults.get(self.current_index).map(|l| &l.grid),
            LevelSource::Local => self.local_levels.get(self.current_index).map(|l| &l.grid),
            LevelSource::Remote => self.current_remote_descriptor().map(|d| &d.grid),
        }
    }

    /// Descriptor-shaped info about the active level
    pub fn current_level_info(&self) -> Option<CurrentLevelInfo> {
        match self.source {
            LevelSource::Default => {
                self.defaults
                    .get(self.current_index)
                    .map(|l| CurrentLevelInfo::Default {
                        index: self.current_index,
                        name: l.name.to_string(),
                        start_position: l.start_position,
                    })
            }
            LevelSource::Local => {
                self.local_levels
                    .get(self.current_index)
                    .map(|l| CurrentLevelInfo::Local {
                        index: self.current_index,
                        name: l.name.clone(),
                        start_position: l.start_position,
                    })
            }
            LevelSource::Remote => {
                self.current_remote_descriptor()
                    .map(|d| CurrentLevelInfo::Remote {
                        id: d.id.clone(),
                        name: d.name.clone(),
                        start_position: d.start_position,
                        author: d.author.clone(),
                        rating: d.rating,
                        plays: d.plays,
                    })
            }
        }
    }

    fn current_remote_descriptor(&self) -> Option<&LevelDescriptor> {
        let id = self.current_remote_id.as_deref()?;
        self.remote_levels.iter().find(|d| d.id == id)
    }

    /// Whether level `index` of the active source is playable
    ///
    /// Remote levels are never gated; Default/Local follow the unlock
    /// counter. Once true for an index, this stays true.
    pub fn is_unlocked(&self, index: usize) -> bool {
        match self.source {
            LevelSource::Remote => true,
            LevelSource::Default | LevelSource::Local => {
                (index as u32) < self.progress.unlocked_levels()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a finished run of the active level
    ///
    /// Default/Local ratchet the unlock counter; Remote merges the best
    /// results locally and forwards the raw outcome to the service
    /// best-effort (a forwarding failure never rolls back the local merge).
    pub fn record_completion(&mut self, outcome: CompletionOutcome) {
        match self.source {
            LevelSource::Default | LevelSource::Local => {
                self.progress.record_local_completion(self.current_index);
            }
            LevelSource::Remote => {
                let Some(id) = self.current_remote_id.clone() else {
                    return;
                };
                self.progress.record_remote_completion(&id, &outcome);
                if let Some(service) = &self.service {
                    let service = Arc::clone(service);
                    self.pending_acks.push(pending::spawn(service, move |svc| {
                        svc.record_completion(&id, &outcome)
                    }));
                }
            }
        }
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local library
    // ─────────────────────────────────────────────────────────────────────────

    pub fn local_levels(&self) -> &[LocalLevel] {
        &self.local_levels
    }

    /// Append a level to the local library and persist it
    pub fn save_local_level(&mut self, level: LocalLevel) -> Result<usize, String> {
        validate_local_level(&level)?;
        self.local_levels.push(level);
        self.persist_library();
        Ok(self.local_levels.len() - 1)
    }

    /// Replace local level `index` and persist the library
    pub fn update_local_level(&mut self, index: usize, level: LocalLevel) -> Result<(), String> {
        validate_local_level(&level)?;
        let slot = self
            .local_levels
            .get_mut(index)
            .ok_or_else(|| format!("no local level at index {}", index))?;
        *slot = level;
        self.persist_library();
        Ok(())
    }

    /// Delete local level `index` (explicit user action only)
    pub fn delete_local_level(&mut self, index: usize) -> bool {
        if index >= self.local_levels.len() {
            return false;
        }
        self.local_levels.remove(index);
        self.progress.forget_local_level(index);
        if self.source == LevelSource::Local && self.current_index >= self.local_levels.len() {
            self.current_index = 0;
        }
        self.persist_library();
        true
    }

    fn persist_library(&self) {
        match serialize_library(&self.local_levels) {
            Ok(bytes) => {
                if let Err(e) = self.store.write(keys::LEVEL_LIBRARY, &bytes) {
                    eprintln!("Repository: failed to persist level library: {}", e);
                }
            }
            Err(e) => eprintln!("Repository: failed to encode level library: {}", e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Author display name, if one was ever set
    pub fn author_name(&self) -> Option<String> {
        self.progress.author_name()
    }

    pub fn set_author_name(&self, name: &str) {
        self.progress.set_author_name(name);
    }

    /// Anonymous user identifier, generated once and reused
    pub fn user_id(&self) -> String {
        self.progress.user_id()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Remote requests (fire-and-poll)
    // ─────────────────────────────────────────────────────────────────────────

    pub fn remote_status(&self) -> RemoteStatus {
        self.remote_status
    }

    /// Session cache of remote descriptors from the last listing
    pub fn remote_levels(&self) -> &[LevelDescriptor] {
        &self.remote_levels
    }

    pub fn featured(&self) -> Option<&FeaturedLevels> {
        self.featured.as_ref()
    }

    pub fn is_fetching_listing(&self) -> bool {
        self.pending_listing.is_some()
    }

    pub fn is_loading_remote_level(&self) -> bool {
        self.pending_level.is_some()
    }

    pub fn is_saving_remote(&self) -> bool {
        !self.pending_saves.is_empty()
    }

    /// Fetch a page of community levels
    ///
    /// Only the latest request is kept; the result arrives via [`poll`].
    /// Without a configured service this degrades to an empty result set.
    ///
    /// [`poll`]: Self::poll
    pub fn request_remote_listing(&mut self, query: ListQuery) {
        let Some(service) = &self.service else {
            eprintln!("Repository: listing unavailable: {}", RemoteError::NotConfigured);
            self.remote_levels.clear();
            self.remote_status = RemoteStatus::NotConfigured;
            return;
        };
        let service = Arc::clone(service);
        self.pending_listing = Some(pending::spawn(service, move |svc| svc.list_levels(&query)));
    }

    /// Fetch the featured shelves
    pub fn request_featured(&mut self) {
        let Some(service) = &self.service else {
            eprintln!("Repository: featured unavailable: {}", RemoteError::NotConfigured);
            self.featured = Some(FeaturedLevels::default());
            self.remote_status = RemoteStatus::NotConfigured;
            return;
        };
        let service = Arc::clone(service);
        self.pending_featured = Some(pending::spawn(service, move |svc| svc.get_featured()));
    }

    /// Fetch one community level and make it current once it arrives
    ///
    /// The selected id is only set after the response arrives AND the active
    /// source is still Remote and no newer request was issued - the
    /// stale-response guard.
    pub fn load_remote_level(&mut self, id: impl Into<String>) {
        let id = id.into();
        let Some(service) = &self.service else {
            eprintln!("Repository: cannot load '{}': {}", id, RemoteError::NotConfigured);
            self.remote_status = RemoteStatus::NotConfigured;
            return;
        };
        let service = Arc::clone(service);
        self.epoch += 1;
        let request_id = id.clone();
        self.pending_level = Some(PendingLevelLoad {
            op: pending::spawn(service, move |svc| svc.get_level(&request_id)),
            id,
            epoch: self.epoch,
        });
    }

    /// Upload local level `index` to the community service
    ///
    /// Re-saving a level that was uploaded before updates the existing remote
    /// entry; otherwise a new one is created. The assigned id arrives via
    /// [`poll`] and is remembered for the next save.
    ///
    /// [`poll`]: Self::poll
    pub fn save_level_remote(
        &mut self,
        index: usize,
        difficulty: crate::level::Difficulty,
        tags: Vec<String>,
        is_public: bool,
    ) -> bool {
        let Some(level) = self.local_levels.get(index) else {
            return false;
        };
        let Some(service) = &self.service else {
            eprintln!(
                "Repository: cannot save '{}': {}",
                level.name,
                RemoteError::NotConfigured
            );
            self.remote_status = RemoteStatus::NotConfigured;
            return false;
        };

        let service = Arc::clone(service);
        let name = level.name.clone();
        let upload = LevelUpload {
            id: self.progress.remote_id_for(index).map(|s| s.to_string()),
            name: name.clone(),
            author: self
                .progress
                .author_name()
                .unwrap_or_else(|| "Anonymous".to_string()),
            grid: level.grid.clone(),
            start_position: level.start_position,
            spike_rotations: level.spike_rotations.clone(),
            difficulty,
            tags,
            is_public,
        };

        self.pending_saves.push(PendingRemoteSave {
            op: pending::spawn(service, move |svc| svc.save_level(&upload)),
            index,
            name,
        });
        true
    }

    /// Forward a rating for a community level, best-effort
    pub fn rate_level(&mut self, id: impl Into<String>, rating: f32) {
        let id = id.into();
        let Some(service) = &self.service else {
            eprintln!("Repository: cannot rate '{}': {}", id, RemoteError::NotConfigured);
            return;
        };
        let user_id = self.progress.user_id();
        let service = Arc::clone(service);
        self.pending_acks.push(pending::spawn(service, move |svc| {
            svc.rate_level(&id, rating, &user_id)
        }));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Poll (applies completed operations behind stale-response guards)
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply every completed remote operation and report what happened
    ///
    /// Call once per frame. Failures degrade (empty results, logged); stale
    /// results are dropped without touching state.
    pub fn poll(&mut self) -> Vec<RepositoryEvent> {
        let mut events = Vec::new();

        // Listing: only the latest request exists, so completion is current
        // by construction
        if let Some(mut op) = self.pending_listing.take() {
            if op.is_complete() {
                match op.take() {
                    Some(Ok(page)) => {
                        self.remote_status = RemoteStatus::Available;
                        events.push(RepositoryEvent::ListingLoaded {
                            count: page.levels.len(),
                            has_more: page.has_more,
                        });
                        self.remote_levels = page.levels;
                    }
                    Some(Err(error)) => {
                        eprintln!("Repository: listing failed: {}", error);
                        self.remote_levels.clear();
                        self.remote_status = RemoteStatus::Unavailable;
                        events.push(RepositoryEvent::ListingFailed(error));
                    }
                    None => {}
                }
            } else {
                self.pending_listing = Some(op);
            }
        }

        if let Some(mut op) = self.pending_featured.take() {
            if op.is_complete() {
                match op.take() {
                    Some(Ok(featured)) => {
                        self.featured = Some(featured);
                        self.remote_status = RemoteStatus::Available;
                        events.push(RepositoryEvent::FeaturedLoaded);
                    }
                    Some(Err(error)) => {
                        eprintln!("Repository: featured failed: {}", error);
                        self.featured = Some(FeaturedLevels::default());
                        self.remote_status = RemoteStatus::Unavailable;
                        events.push(RepositoryEvent::FeaturedFailed(error));
                    }
                    None => {}
                }
            } else {
                self.pending_featured = Some(op);
            }
        }

        if let Some(mut load) = self.pending_level.take() {
            if load.op.is_complete() {
                let still_current =
                    load.epoch == self.epoch && self.source == LevelSource::Remote;
                match load.op.take() {
                    _ if !still_current => {
                        println!("Repository: dropping stale response for '{}'", load.id);
                    }
                    Some(Ok(descriptor)) => {
                        self.upsert_remote_level(descriptor);
                        self.current_remote_id = Some(load.id.clone());
                        self.remote_status = RemoteStatus::Available;
                        events.push(RepositoryEvent::LevelLoaded { id: load.id });
                    }
                    Some(Err(error)) => {
                        eprintln!("Repository: loading '{}' failed: {}", load.id, error);
                        self.remote_status = RemoteStatus::Unavailable;
                        events.push(RepositoryEvent::LevelLoadFailed { id: load.id, error });
                    }
                    None => {}
                }
            } else {
                self.pending_level = Some(load);
            }
        }

        let mut still_pending = Vec::new();
        for mut save in self.pending_saves.drain(..) {
            if !save.op.is_complete() {
                still_pending.push(save);
                continue;
            }
            // The library may have changed while the upload was in flight
            let still_current = self
                .local_levels
                .get(save.index)
                .map(|l| l.name == save.name)
                .unwrap_or(false);
            match save.op.take() {
                _ if !still_current => {
                    println!("Repository: dropping stale save result for '{}'", save.name);
                }
                Some(Ok(saved)) => {
                    self.progress.set_remote_id(save.index, saved.id.clone());
                    self.remote_status = RemoteStatus::Available;
                    events.push(RepositoryEvent::LevelSaved {
                        index: save.index,
                        id: saved.id,
                    });
                }
                Some(Err(error)) => {
                    eprintln!("Repository: saving '{}' failed: {}", save.name, error);
                    self.remote_status = RemoteStatus::Unavailable;
                    events.push(RepositoryEvent::LevelSaveFailed {
                        index: save.index,
                        error,
                    });
                }
                None => {}
            }
        }
        self.pending_saves = still_pending;

        self.pending_acks.retain_mut(|op| {
            if !op.is_complete() {
                return true;
            }
            if let Some(Err(e)) = op.result() {
                eprintln!("Repository: forward failed (ignored): {}", e);
            }
            false
        });

        events
    }

    fn upsert_remote_level(&mut self, descriptor: LevelDescriptor) {
        if let Some(existing) = self
            .remote_levels
            .iter_mut()
            .find(|d| d.id == descriptor.id)
        {
            *existing = descriptor;
        } else {
            self.remote_levels.push(descriptor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::serializer::generate_template;
    use crate::level::Difficulty;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory service with an optional gate that holds the next gated
    /// call until the test releases it
    struct MockService {
        levels: Mutex<Vec<LevelDescriptor>>,
        uploads: Mutex<Vec<LevelUpload>>,
        completions: Mutex<Vec<(String, CompletionOutcome)>>,
        ratings: Mutex<Vec<(String, f32, String)>>,
        gate: Mutex<Option<Receiver<()>>>,
    }

    impl MockService {
        fn new(levels: Vec<LevelDescriptor>) -> Self {
            Self {
                levels: Mutex::new(levels),
                uploads: Mutex::new(Vec::new()),
                completions: Mutex::new(Vec::new()),
                ratings: Mutex::new(Vec::new()),
                gate: Mutex::new(None),
            }
        }

        /// Make the next gated call block until the returned sender fires
        fn hold_next_call(&self) -> Sender<()> {
            let (tx, rx) = channel();
            *self.gate.lock().unwrap() = Some(rx);
            tx
        }

        fn wait_gate(&self) {
            let gate = self.gate.lock().unwrap().take();
            if let Some(rx) = gate {
                let _ = rx.recv_timeout(Duration::from_secs(5));
            }
        }
    }

    impl RemoteLevelService for MockService {
        fn list_levels(&self, _query: &ListQuery) -> Result<LevelPage, RemoteError> {
            Ok(LevelPage {
                levels: self.levels.lock().unwrap().clone(),
                has_more: false,
            })
        }

        fn get_level(&self, id: &str) -> Result<LevelDescriptor, RemoteError> {
            self.wait_gate();
            self.levels
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))
        }

        fn get_featured(&self) -> Result<FeaturedLevels, RemoteError> {
            let levels = self.levels.lock().unwrap().clone();
            Ok(FeaturedLevels {
                popular: levels.clone(),
                top_rated: Vec::new(),
                recent: levels,
            })
        }

        fn save_level(&self, upload: &LevelUpload) -> Result<SavedLevel, RemoteError> {
            self.wait_gate();
            let mut uploads = self.uploads.lock().unwrap();
            let id = upload
                .id
                .clone()
                .unwrap_or_else(|| format!("r{}", uploads.len() + 1));
            uploads.push(upload.clone());
            Ok(SavedLevel { id })
        }

        fn record_completion(
            &self,
            id: &str,
            outcome: &CompletionOutcome,
        ) -> Result<(), RemoteError> {
            self.completions
                .lock()
                .unwrap()
                .push((id.to_string(), *outcome));
            Ok(())
        }

        fn rate_level(&self, id: &str, rating: f32, user_id: &str) -> Result<(), RemoteError> {
            self.ratings
                .lock()
                .unwrap()
                .push((id.to_string(), rating, user_id.to_string()));
            Ok(())
        }
    }

    /// Service where every call fails
    struct DownService;

    impl RemoteLevelService for DownService {
        fn list_levels(&self, _: &ListQuery) -> Result<LevelPage, RemoteError> {
            Err(RemoteError::Unreachable("down".to_string()))
        }
        fn get_level(&self, _: &str) -> Result<LevelDescriptor, RemoteError> {
            Err(RemoteError::Unreachable("down".to_string()))
        }
        fn get_featured(&self) -> Result<FeaturedLevels, RemoteError> {
            Err(RemoteError::Unreachable("down".to_string()))
        }
        fn save_level(&self, _: &LevelUpload) -> Result<SavedLevel, RemoteError> {
            Err(RemoteError::Unreachable("down".to_string()))
        }
        fn record_completion(&self, _: &str, _: &CompletionOutcome) -> Result<(), RemoteError> {
            Err(RemoteError::Unreachable("down".to_string()))
        }
        fn rate_level(&self, _: &str, _: f32, _: &str) -> Result<(), RemoteError> {
            Err(RemoteError::Unreachable("down".to_string()))
        }
    }

    fn remote_descriptor(id: &str, name: &str) -> LevelDescriptor {
        LevelDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            author: "someone".to_string(),
            grid: generate_template(12, 8),
            start_position: StartPosition::new(1, 6),
            spike_rotations: None,
            difficulty: Difficulty::Medium,
            tags: Vec::new(),
            is_public: true,
            rating: 3.5,
            plays: 42,
        }
    }

    fn repo_with(service: Option<Arc<dyn RemoteLevelService>>) -> (TempDir, LevelRepository) {
        let dir = TempDir::new().unwrap();
        let store = KvStore::with_base_dir(dir.path());
        let mut repo = LevelRepository::new(store, service);
        repo.initialize();
        (dir, repo)
    }

    /// Poll until at least one event arrives
    fn pump_events(repo: &mut LevelRepository) -> Vec<RepositoryEvent> {
        for _ in 0..400 {
            let events = repo.poll();
            if !events.is_empty() {
                return events;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no events arrived");
    }

    /// Poll until a condition holds, collecting every event seen on the way
    fn pump_until(
        repo: &mut LevelRepository,
        mut done: impl FnMut(&LevelRepository) -> bool,
    ) -> Vec<RepositoryEvent> {
        let mut seen = Vec::new();
        for _ in 0..400 {
            seen.extend(repo.poll());
            if done(repo) {
                return seen;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition never reached");
    }

    #[test]
    fn test_usable_offline_with_defaults() {
        let (_dir, repo) = repo_with(None);
        assert_eq!(repo.source(), LevelSource::Default);
        assert!(repo.level_count() > 0);
        assert!(repo.current_level().is_some());
        assert_eq!(repo.remote_status(), RemoteStatus::NotConfigured);
        assert!(repo.remote_levels().is_empty());
    }

    #[test]
    fn test_unlock_gating_and_completion() {
        let (_dir, mut repo) = repo_with(None);

        assert!(repo.is_unlocked(0));
        assert!(!repo.is_unlocked(1));
        assert!(!repo.set_current_index(1));
        assert_eq!(repo.current_index(), 0);

        repo.record_completion(CompletionOutcome {
            time: 8.0,
            deaths: 2,
        });
        assert!(repo.is_unlocked(1));
        assert!(repo.set_current_index(1));

        // Once unlocked, further completions never re-lock anything
        repo.record_completion(CompletionOutcome {
            time: 30.0,
            deaths: 9,
        });
        assert!(repo.is_unlocked(0));
        assert!(repo.is_unlocked(1));
    }

    #[test]
    fn test_source_switch_resets_selection() {
        let (_dir, mut repo) = repo_with(None);
        repo.record_completion(CompletionOutcome {
            time: 5.0,
            deaths: 0,
        });
        assert!(repo.set_current_index(1));

        // Local library is empty: index resets to 0, which never exceeds
        // the new source's length
        repo.select_source(LevelSource::Local);
        assert_eq!(repo.current_index(), 0);
        assert!(repo.current_level().is_none());

        // Remote starts with nothing selected rather than reusing an index
        repo.select_source(LevelSource::Remote);
        assert!(repo.current_level_info().is_none());
        assert!(repo.current_level().is_none());
        assert!(!repo.set_current_index(0));

        repo.select_source(LevelSource::Default);
        assert_eq!(repo.current_index(), 0);
        assert!(repo.current_level().is_some());
    }

    #[test]
    fn test_listing_loads_into_session_cache() {
        let mock = Arc::new(MockService::new(vec![
            remote_descriptor("a", "Alpha"),
            remote_descriptor("b", "Beta"),
        ]));
        let (_dir, mut repo) = repo_with(Some(mock));

        let events = pump_events(&mut repo);
        assert!(events.contains(&RepositoryEvent::ListingLoaded {
            count: 2,
            has_more: false,
        }));
        assert_eq!(repo.remote_levels().len(), 2);
        assert_eq!(repo.remote_status(), RemoteStatus::Available);
    }

    #[test]
    fn test_listing_failure_degrades_to_empty() {
        let (_dir, mut repo) = repo_with(Some(Arc::new(DownService)));

        let events = pump_events(&mut repo);
        assert!(matches!(events[0], RepositoryEvent::ListingFailed(_)));
        assert!(repo.remote_levels().is_empty());
        // The side channel still distinguishes "unreachable" from "empty"
        assert_eq!(repo.remote_status(), RemoteStatus::Unavailable);
    }

    #[test]
    fn test_load_remote_level_becomes_current() {
        let mock = Arc::new(MockService::new(vec![remote_descriptor("a", "Alpha")]));
        let (_dir, mut repo) = repo_with(Some(mock));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        repo.select_source(LevelSource::Remote);
        repo.load_remote_level("a");
        let events = pump_until(&mut repo, |r| !r.is_loading_remote_level());
        assert!(events.contains(&RepositoryEvent::LevelLoaded {
            id: "a".to_string(),
        }));

        match repo.current_level_info() {
            Some(CurrentLevelInfo::Remote { id, author, .. }) => {
                assert_eq!(id, "a");
                assert_eq!(author, "someone");
            }
            other => panic!("expected remote info, got {:?}", other),
        }
        assert!(repo.current_level().is_some());
        // Remote levels are never gated
        assert!(repo.is_unlocked(999));
    }

    #[test]
    fn test_stale_level_response_does_not_clobber_default_state() {
        let mock = Arc::new(MockService::new(vec![remote_descriptor("a", "Alpha")]));
        let service: Arc<dyn RemoteLevelService> = mock.clone();
        let (_dir, mut repo) = repo_with(Some(service));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        repo.select_source(LevelSource::Remote);
        let release = mock.hold_next_call();
        repo.load_remote_level("a");

        // Caller walks away while the fetch is in flight
        repo.select_source(LevelSource::Default);
        release.send(()).unwrap();

        let events = pump_until(&mut repo, |r| !r.is_loading_remote_level());
        assert!(!events
            .iter()
            .any(|e| matches!(e, RepositoryEvent::LevelLoaded { .. })));

        // Default-mode state is untouched by the late arrival
        assert_eq!(repo.source(), LevelSource::Default);
        assert_eq!(repo.current_index(), 0);
        match repo.current_level_info() {
            Some(CurrentLevelInfo::Default { index: 0, .. }) => {}
            other => panic!("expected default info, got {:?}", other),
        }

        // Coming back to Remote starts with nothing selected
        repo.select_source(LevelSource::Remote);
        assert!(repo.current_level_info().is_none());
    }

    #[test]
    fn test_newer_request_supersedes_older_one() {
        let mock = Arc::new(MockService::new(vec![
            remote_descriptor("a", "Alpha"),
            remote_descriptor("b", "Beta"),
        ]));
        let service: Arc<dyn RemoteLevelService> = mock.clone();
        let (_dir, mut repo) = repo_with(Some(service));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        repo.select_source(LevelSource::Remote);
        let release = mock.hold_next_call();
        repo.load_remote_level("a");
        repo.load_remote_level("b");
        release.send(()).unwrap();

        pump_until(&mut repo, |r| !r.is_loading_remote_level());
        match repo.current_level_info() {
            Some(CurrentLevelInfo::Remote { id, .. }) => assert_eq!(id, "b"),
            other => panic!("expected remote info for 'b', got {:?}", other),
        }
    }

    #[test]
    fn test_remote_completion_merges_and_forwards() {
        let mock = Arc::new(MockService::new(vec![remote_descriptor("a", "Alpha")]));
        let service: Arc<dyn RemoteLevelService> = mock.clone();
        let (_dir, mut repo) = repo_with(Some(service));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        repo.select_source(LevelSource::Remote);
        repo.load_remote_level("a");
        pump_until(&mut repo, |r| !r.is_loading_remote_level());

        repo.record_completion(CompletionOutcome {
            time: 10.0,
            deaths: 3,
        });
        repo.record_completion(CompletionOutcome {
            time: 12.0,
            deaths: 1,
        });

        let record = repo.progress().remote_completion("a").unwrap();
        assert_eq!(record.best_time, 10.0);
        assert_eq!(record.best_deaths, 1);

        // Raw outcomes reach the service best-effort
        pump_until(&mut repo, |_| mock.completions.lock().unwrap().len() == 2);
        let forwarded = mock.completions.lock().unwrap();
        assert_eq!(forwarded[0].0, "a");
        assert_eq!(forwarded[1].1.deaths, 1);
    }

    #[test]
    fn test_remote_save_creates_then_updates() {
        let mock = Arc::new(MockService::new(Vec::new()));
        let service: Arc<dyn RemoteLevelService> = mock.clone();
        let (_dir, mut repo) = repo_with(Some(service));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        let level = LocalLevel::new("Mine", generate_template(12, 8), StartPosition::new(1, 6));
        let index = repo.save_local_level(level).unwrap();

        assert!(repo.save_level_remote(index, Difficulty::Hard, vec!["tricky".to_string()], true));
        let events = pump_until(&mut repo, |r| !r.is_saving_remote());
        assert!(events.contains(&RepositoryEvent::LevelSaved {
            index,
            id: "r1".to_string(),
        }));
        assert_eq!(repo.progress().remote_id_for(index), Some("r1"));

        // Re-save updates the existing remote entry instead of creating one
        assert!(repo.save_level_remote(index, Difficulty::Hard, Vec::new(), true));
        pump_until(&mut repo, |r| !r.is_saving_remote());
        let uploads = mock.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].id, None);
        assert_eq!(uploads[1].id, Some("r1".to_string()));
    }

    #[test]
    fn test_save_result_dropped_when_level_deleted() {
        let mock = Arc::new(MockService::new(Vec::new()));
        let service: Arc<dyn RemoteLevelService> = mock.clone();
        let (_dir, mut repo) = repo_with(Some(service));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        let index = repo
            .save_local_level(LocalLevel::new(
                "Doomed",
                generate_template(12, 8),
                StartPosition::new(1, 6),
            ))
            .unwrap();

        let release = mock.hold_next_call();
        assert!(repo.save_level_remote(index, Difficulty::Easy, Vec::new(), false));
        assert!(repo.delete_local_level(index));
        release.send(()).unwrap();

        let events = pump_until(&mut repo, |r| !r.is_saving_remote());
        assert!(!events
            .iter()
            .any(|e| matches!(e, RepositoryEvent::LevelSaved { .. })));
        assert_eq!(repo.progress().remote_id_for(index), None);
    }

    #[test]
    fn test_local_library_persists_across_sessions() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::with_base_dir(dir.path());

        let mut repo = LevelRepository::new(store.clone(), None);
        repo.initialize();
        repo.save_local_level(LocalLevel::new(
            "Keeper",
            generate_template(10, 8),
            StartPosition::new(1, 6),
        ))
        .unwrap();

        let mut fresh = LevelRepository::new(store, None);
        fresh.initialize();
        assert_eq!(fresh.local_levels().len(), 1);
        assert_eq!(fresh.local_levels()[0].name, "Keeper");

        fresh.select_source(LevelSource::Local);
        assert!(fresh.current_level().is_some());
        assert_eq!(fresh.current_level_info().unwrap().name(), "Keeper");
    }

    #[test]
    fn test_rating_forwards_user_id() {
        let mock = Arc::new(MockService::new(vec![remote_descriptor("a", "Alpha")]));
        let service: Arc<dyn RemoteLevelService> = mock.clone();
        let (_dir, mut repo) = repo_with(Some(service));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        let user_id = repo.user_id();
        repo.rate_level("a", 4.5);
        pump_until(&mut repo, |_| !mock.ratings.lock().unwrap().is_empty());

        let ratings = mock.ratings.lock().unwrap();
        assert_eq!(ratings[0].0, "a");
        assert_eq!(ratings[0].1, 4.5);
        assert_eq!(ratings[0].2, user_id);
    }

    #[test]
    fn test_featured_request() {
        let mock = Arc::new(MockService::new(vec![remote_descriptor("a", "Alpha")]));
        let (_dir, mut repo) = repo_with(Some(mock));
        pump_until(&mut repo, |r| !r.is_fetching_listing());

        repo.request_featured();
        let events = pump_until(&mut repo, |r| r.featured().is_some());
        assert!(events.contains(&RepositoryEvent::FeaturedLoaded));
        assert_eq!(repo.featured().unwrap().popular.len(), 1);
    }
}
