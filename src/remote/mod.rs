//! Remote level service contract and HTTP adapter
//!
//! The repository only ever talks to the community level service through the
//! [`RemoteLevelService`] trait. A missing service (not configured, offline)
//! is treated exactly like a failing call: the repository degrades and never
//! raises past its boundary.

pub mod pending;

use crate::level::{validate_descriptor, Difficulty, LevelDescriptor, StartPosition, TileGrid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote service error types
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// No service is configured; behaves like any other failure
    NotConfigured,
    /// Transport-level failure (DNS, connect, timeout)
    Unreachable(String),
    /// The requested level does not exist
    NotFound(String),
    /// Too many requests
    RateLimited,
    /// Service answered with an error status
    Rejected { code: u16, message: String },
    /// Service answered with something we cannot interpret
    Protocol(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NotConfigured => write!(f, "remote service not configured"),
            RemoteError::Unreachable(msg) => write!(f, "service unreachable: {}", msg),
            RemoteError::NotFound(id) => write!(f, "level not found: {}", id),
            RemoteError::RateLimited => write!(f, "rate limited, try again later"),
            RemoteError::Rejected { code, message } => {
                write!(f, "service rejected request (HTTP {}): {}", code, message)
            }
            RemoteError::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Listing filter and pagination options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub difficulty: Option<Difficulty>,
    pub tag: Option<String>,
    pub author: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl ListQuery {
    /// First page with the default page size
    pub fn first_page() -> Self {
        Self {
            page_size: 20,
            ..Self::default()
        }
    }
}

/// One page of a level listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPage {
    pub levels: Vec<LevelDescriptor>,
    pub has_more: bool,
}

/// Featured level shelves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedLevels {
    pub popular: Vec<LevelDescriptor>,
    pub top_rated: Vec<LevelDescriptor>,
    pub recent: Vec<LevelDescriptor>,
}

/// Outcome of one finished run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub time: f64,
    pub deaths: u32,
}

/// Server acknowledgement of a saved level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedLevel {
    pub id: String,
}

/// A level being uploaded. `id` present means "update", absent means "create".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelUpload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub author: String,
    pub grid: TileGrid,
    pub start_position: StartPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spike_rotations: Option<Vec<Vec<u8>>>,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub is_public: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service contract
// ─────────────────────────────────────────────────────────────────────────────

/// The operations the repository depends on
///
/// Implementations run on worker threads (see [`pending`]), so they may
/// block.
pub trait RemoteLevelService: Send + Sync {
    fn list_levels(&self, query: &ListQuery) -> Result<LevelPage, RemoteError>;
    fn get_level(&self, id: &str) -> Result<LevelDescriptor, RemoteError>;
    fn get_featured(&self) -> Result<FeaturedLevels, RemoteError>;
    fn save_level(&self, upload: &LevelUpload) -> Result<SavedLevel, RemoteError>;
    fn record_completion(&self, id: &str, outcome: &CompletionOutcome) -> Result<(), RemoteError>;
    fn rate_level(&self, id: &str, rating: f32, user_id: &str) -> Result<(), RemoteError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP adapter (ureq)
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for the community level service
///
/// Responses use the `{"success": true, "data": ...}` envelope.
#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    base_url: String,
}

impl HttpRemoteService {
    /// Create a client for the service at `base_url` (no trailing slash)
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_json(&self, endpoint: &str) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = ureq::get(&url).call().map_err(convert_error)?;
        response
            .into_json::<serde_json::Value>()
            .map_err(|e| RemoteError::Protocol(format!("JSON parse error: {}", e)))
    }

    fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = ureq::post(&url).send_json(body).map_err(convert_error)?;
        response
            .into_json::<serde_json::Value>()
            .map_err(|e| RemoteError::Protocol(format!("JSON parse error: {}", e)))
    }
}

/// Pull the `data` field out of a response envelope
fn data_envelope(value: serde_json::Value) -> Result<serde_json::Value, RemoteError> {
    match value.get("data") {
        Some(data) => Ok(data.clone()),
        None => Err(RemoteError::Protocol("no data in response".to_string())),
    }
}

/// Drop descriptors that fail ingestion validation, logging each one
fn sanitize_levels(levels: Vec<LevelDescriptor>) -> Vec<LevelDescriptor> {
    levels
        .into_iter()
        .filter(|desc| match validate_descriptor(desc) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Remote: dropping malformed level: {}", e);
                false
            }
        })
        .collect()
}

/// Build the query string for a listing request
fn listing_query_string(query: &ListQuery) -> String {
    let mut params = vec![
        format!("page={}", query.page),
        format!("pageSize={}", query.page_size),
    ];
    if let Some(difficulty) = query.difficulty {
        params.push(format!(
            "difficulty={}",
            difficulty.label().to_ascii_lowercase()
        ));
    }
    if let Some(tag) = &query.tag {
        params.push(format!("tag={}", urlencoding::encode(tag)));
    }
    if let Some(author) = &query.author {
        params.push(format!("author={}", urlencoding::encode(author)));
    }
    params.join("&")
}

/// Convert a ureq error into a RemoteError
fn convert_error(e: ureq::Error) -> RemoteError {
    match e {
        ureq::Error::Status(404, _) => RemoteError::NotFound("not found".to_string()),
        ureq::Error::Status(429, _) => RemoteError::RateLimited,
        ureq::Error::Status(code, response) => {
            let message = response.into_string().unwrap_or_default();
            RemoteError::Rejected { code, message }
        }
        other => RemoteError::Unreachable(other.to_string()),
    }
}

impl RemoteLevelService for HttpRemoteService {
    fn list_levels(&self, query: &ListQuery) -> Result<LevelPage, RemoteError> {
        let endpoint = format!("/levels?{}", listing_query_string(query));
        let data = data_envelope(self.get_json(&endpoint)?)?;
        let mut page: LevelPage = serde_json::from_value(data)
            .map_err(|e| RemoteError::Protocol(format!("bad listing: {}", e)))?;
        page.levels = sanitize_levels(page.levels);
        Ok(page)
    }

    fn get_level(&self, id: &str) -> Result<LevelDescriptor, RemoteError> {
        let endpoint = format!("/levels/{}", urlencoding::encode(id));
        let data = data_envelope(self.get_json(&endpoint)?)?;
        let desc: LevelDescriptor = serde_json::from_value(data)
            .map_err(|e| RemoteError::Protocol(format!("bad level: {}", e)))?;
        validate_descriptor(&desc).map_err(RemoteError::Protocol)?;
        Ok(desc)
    }

    fn get_featured(&self) -> Result<FeaturedLevels, RemoteError> {
        let data = data_envelope(self.get_json("/featured")?)?;
        let mut featured: FeaturedLevels = serde_json::from_value(data)
            .map_err(|e| RemoteError::Protocol(format!("bad featured: {}", e)))?;
        featured.popular = sanitize_levels(featured.popular);
        featured.top_rated = sanitize_levels(featured.top_rated);
        featured.recent = sanitize_levels(featured.recent);
        Ok(featured)
    }

    fn save_level(&self, upload: &LevelUpload) -> Result<SavedLevel, RemoteError> {
        let body = serde_json::to_value(upload)
            .map_err(|e| RemoteError::Protocol(format!("bad upload: {}", e)))?;
        let endpoint = match &upload.id {
            Some(id) => format!("/levels/{}", urlencoding::encode(id)),
            None => "/levels".to_string(),
        };
        let data = data_envelope(self.post_json(&endpoint, &body)?)?;
        serde_json::from_value(data)
            .map_err(|e| RemoteError::Protocol(format!("bad save response: {}", e)))
    }

    fn record_completion(&self, id: &str, outcome: &CompletionOutcome) -> Result<(), RemoteError> {
        let endpoint = format!("/levels/{}/completions", urlencoding::encode(id));
        let body = serde_json::json!({
            "time": outcome.time,
            "deaths": outcome.deaths,
        });
        self.post_json(&endpoint, &body)?;
        Ok(())
    }

    fn rate_level(&self, id: &str, rating: f32, user_id: &str) -> Result<(), RemoteError> {
        let endpoint = format!("/levels/{}/ratings", urlencoding::encode(id));
        let body = serde_json::json!({
            "rating": rating,
            "userId": user_id,
        });
        self.post_json(&endpoint, &body)?;
        Ok(())
    }
}
