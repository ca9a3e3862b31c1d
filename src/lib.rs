//! Level repository for a tile-based platformer
//!
//! Aggregates three level sources behind one interface: the bundled default
//! levels, a locally authored library persisted on disk, and a remote
//! community service. Player progress (unlocks, best times, best death
//! counts) is tracked per source and survives restarts.
//!
//! Remote access is strictly fire-and-poll: every network call runs on a
//! background thread, the caller keeps rendering, and results are applied by
//! [`LevelRepository::poll`] behind stale-response guards. Losing the network
//! (or never configuring it) degrades to empty community listings; the
//! default levels always work.
//!
//! ```no_run
//! use tilerun_levels::repository::{LevelRepository, RepositoryConfig};
//!
//! let mut repo = LevelRepository::from_config(RepositoryConfig {
//!     data_dir: "./data".into(),
//!     remote_url: Some("https://levels.example.com/api".to_string()),
//! });
//! repo.initialize();
//!
//! // once per frame
//! for event in repo.poll() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod level;
pub mod remote;
pub mod repository;
pub mod store;

pub use level::serializer::{decode, encode, generate_template};
pub use level::share::{decode_share_payload, encode_share_payload, SharePayload};
pub use level::{Difficulty, LevelDescriptor, LocalLevel, StartPosition, TileGrid};
pub use remote::{
    CompletionOutcome, FeaturedLevels, HttpRemoteService, LevelPage, ListQuery, RemoteError,
    RemoteLevelService,
};
pub use repository::{
    CurrentLevelInfo, LevelRepository, LevelSource, RemoteStatus, RepositoryConfig,
};
pub use store::progress::ProgressStore;
