//! Level data model
//!
//! Tile grids, level descriptors, and the validation applied at the
//! ingestion boundaries (remote listings, shared payloads, library files).

pub mod defaults;
pub mod library;
pub mod serializer;
pub mod share;

use serde::{Deserialize, Serialize};

/// Row-major tile grid. All rows have equal length; row 0 is the top of the
/// level, and position within the grid defines rendering/collision position.
pub type TileGrid = Vec<Vec<u16>>;

/// Tile codes understood by the game and the template generator.
pub mod tiles {
    /// Empty space
    pub const EMPTY: u16 = 0;
    /// Solid platform / floor
    pub const PLATFORM: u16 = 1;
    /// Spike hazard
    pub const SPIKE: u16 = 2;
    /// Level goal
    pub const GOAL: u16 = 3;
}

/// Validation limits to prevent resource exhaustion from hostile level data
pub mod limits {
    /// Maximum grid dimension (width or height)
    pub const MAX_GRID_SIZE: usize = 256;
    /// Maximum string length for names, authors and tags
    pub const MAX_STRING_LEN: usize = 256;
    /// Maximum number of tags on a level
    pub const MAX_TAGS: usize = 16;
}

/// Player start position in tile coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPosition {
    pub x: i32,
    pub y: i32,
}

impl StartPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Default for StartPosition {
    /// The fallback start used when a level carries no explicit position
    fn default() -> Self {
        Self { x: 1, y: 12 }
    }
}

/// Level difficulty as self-reported by the author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Extreme,
}

impl Difficulty {
    /// Human-readable label for the difficulty
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::Extreme => "Extreme",
        }
    }
}

/// Full metadata plus grid for one community level, as served by the
/// remote level service.
///
/// `id` is source-local and not guaranteed unique across sources. `author`
/// is a self-reported display string, not a verified credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDescriptor {
    pub id: String,
    pub name: String,
    pub author: String,
    pub grid: TileGrid,
    pub start_position: StartPosition,
    /// Per-cell spike rotation metadata, same shape as `grid` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spike_rotations: Option<Vec<Vec<u8>>>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub plays: u32,
}

fn default_true() -> bool {
    true
}

/// A locally authored level as stored in the library file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalLevel {
    pub name: String,
    pub grid: TileGrid,
    pub start_position: StartPosition,
    #[serde(default)]
    pub spike_rotations: Option<Vec<Vec<u8>>>,
}

impl LocalLevel {
    pub fn new(name: impl Into<String>, grid: TileGrid, start_position: StartPosition) -> Self {
        Self {
            name: name.into(),
            grid,
            start_position,
            spike_rotations: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation (applied at ingestion boundaries)
// ─────────────────────────────────────────────────────────────────────────────

/// Check that a grid is non-empty, rectangular and within size limits
pub fn validate_grid(grid: &TileGrid) -> Result<(), String> {
    if grid.is_empty() || grid[0].is_empty() {
        return Err("grid is empty".to_string());
    }
    if grid.len() > limits::MAX_GRID_SIZE {
        return Err(format!(
            "grid too tall ({} > {})",
            grid.len(),
            limits::MAX_GRID_SIZE
        ));
    }
    let width = grid[0].len();
    if width > limits::MAX_GRID_SIZE {
        return Err(format!(
            "grid too wide ({} > {})",
            width,
            limits::MAX_GRID_SIZE
        ));
    }
    for (y, row) in grid.iter().enumerate() {
        if row.len() != width {
            return Err(format!(
                "row {} length mismatch ({} != {})",
                y,
                row.len(),
                width
            ));
        }
    }
    Ok(())
}

/// Check that a start position lies within the grid bounds
pub fn validate_start_position(pos: &StartPosition, grid: &TileGrid) -> Result<(), String> {
    let height = grid.len() as i32;
    let width = grid.first().map(|r| r.len()).unwrap_or(0) as i32;
    if pos.x < 0 || pos.y < 0 || pos.x >= width || pos.y >= height {
        return Err(format!(
            "start position ({}, {}) outside {}x{} grid",
            pos.x, pos.y, width, height
        ));
    }
    Ok(())
}

/// Validate a locally authored level before it enters the library
pub fn validate_local_level(level: &LocalLevel) -> Result<(), String> {
    if level.name.len() > limits::MAX_STRING_LEN {
        return Err(format!(
            "name too long ({} > {})",
            level.name.len(),
            limits::MAX_STRING_LEN
        ));
    }
    validate_grid(&level.grid)?;
    validate_start_position(&level.start_position, &level.grid)?;
    if let Some(rotations) = &level.spike_rotations {
        validate_spike_rotations(rotations, &level.grid)?;
    }
    Ok(())
}

/// Check that a spike rotation grid matches the level grid shape exactly
fn validate_spike_rotations(rotations: &[Vec<u8>], grid: &TileGrid) -> Result<(), String> {
    if rotations.len() != grid.len() {
        return Err(format!(
            "spike rotation grid height mismatch ({} != {})",
            rotations.len(),
            grid.len()
        ));
    }
    let width = grid.first().map(|r| r.len()).unwrap_or(0);
    for (y, row) in rotations.iter().enumerate() {
        if row.len() != width {
            return Err(format!(
                "spike rotation row {} length mismatch ({} != {})",
                y,
                row.len(),
                width
            ));
        }
    }
    Ok(())
}

/// Validate a descriptor received from the remote service
pub fn validate_descriptor(desc: &LevelDescriptor) -> Result<(), String> {
    let context = format!("level '{}'", desc.id);
    if desc.name.len() > limits::MAX_STRING_LEN {
        return Err(format!("{}: name too long", context));
    }
    if desc.author.len() > limits::MAX_STRING_LEN {
        return Err(format!("{}: author too long", context));
    }
    if desc.tags.len() > limits::MAX_TAGS {
        return Err(format!(
            "{}: too many tags ({} > {})",
            context,
            desc.tags.len(),
            limits::MAX_TAGS
        ));
    }
    for tag in &desc.tags {
        if tag.len() > limits::MAX_STRING_LEN {
            return Err(format!("{}: tag too long", context));
        }
    }
    validate_grid(&desc.grid).map_err(|e| format!("{}: {}", context, e))?;
    validate_start_position(&desc.start_position, &desc.grid)
        .map_err(|e| format!("{}: {}", context, e))?;
    if let Some(rotations) = &desc.spike_rotations {
        validate_spike_rotations(rotations, &desc.grid)
            .map_err(|e| format!("{}: {}", context, e))?;
    }
    Ok(())
}
