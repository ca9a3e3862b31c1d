//! Level serialization and template generation
//!
//! Pure, synchronous helpers used by editor and export tooling. The textual
//! form is compact row-major JSON, stable across calls for equal grids, so it
//! doubles as an equality surrogate.

use super::{tiles, validate_grid, TileGrid};
use std::fmt;

/// Error type for grid decoding
#[derive(Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Input is not valid JSON or not an array of arrays
    Parse(String),
    /// A row's length differs from the first row
    NotRectangular {
        row: usize,
        len: usize,
        expected: usize,
    },
    /// A cell is not a small non-negative integer
    BadTile(String),
    /// Grid has no rows or no columns
    Empty,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Parse(msg) => write!(f, "parse error: {}", msg),
            FormatError::NotRectangular { row, len, expected } => {
                write!(f, "row {} length mismatch ({} != {})", row, len, expected)
            }
            FormatError::BadTile(msg) => write!(f, "bad tile value: {}", msg),
            FormatError::Empty => write!(f, "grid is empty"),
        }
    }
}

impl std::error::Error for FormatError {}

/// Encode a grid to its canonical row-major textual form
///
/// Equal grids always encode to the same string.
pub fn encode(grid: &TileGrid) -> String {
    // serde_json output for Vec<Vec<u16>> is compact and deterministic
    serde_json::to_string(grid).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a grid from its textual form
///
/// Fails when rows are non-rectangular or cells are not small non-negative
/// integers.
pub fn decode(text: &str) -> Result<TileGrid, FormatError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FormatError::Parse(e.to_string()))?;

    let rows = value
        .as_array()
        .ok_or_else(|| FormatError::Parse("expected an array of rows".to_string()))?;

    let mut grid: TileGrid = Vec::with_capacity(rows.len());
    for (y, row_value) in rows.iter().enumerate() {
        let cells = row_value
            .as_array()
            .ok_or_else(|| FormatError::Parse(format!("row {} is not an array", y)))?;

        let mut row = Vec::with_capacity(cells.len());
        for cell in cells {
            let code = cell
                .as_u64()
                .ok_or_else(|| FormatError::BadTile(cell.to_string()))?;
            if code > u16::MAX as u64 {
                return Err(FormatError::BadTile(cell.to_string()));
            }
            row.push(code as u16);
        }
        grid.push(row);
    }

    if grid.is_empty() || grid[0].is_empty() {
        return Err(FormatError::Empty);
    }
    let expected = grid[0].len();
    for (y, row) in grid.iter().enumerate() {
        if row.len() != expected {
            return Err(FormatError::NotRectangular {
                row: y,
                len: row.len(),
                expected,
            });
        }
    }
    debug_assert!(validate_grid(&grid).is_ok());

    Ok(grid)
}

/// Create a deterministic level template with common game elements
///
/// Bottom row is solid floor, a goal sits near the top-right, and a fixed
/// platform run plus a single spike are placed at offsets from the
/// bottom-right. Elements whose offsets fall outside a small grid are
/// simply omitted.
pub fn generate_template(width: usize, height: usize) -> TileGrid {
    let mut grid = vec![vec![tiles::EMPTY; width]; height];

    // Ground floor along the bottom
    if let Some(bottom) = grid.last_mut() {
        bottom.fill(tiles::PLATFORM);
    }

    // Goal on the right side
    place(&mut grid, height.checked_sub(3), width.checked_sub(3), tiles::GOAL);

    // A short platform run
    place(&mut grid, height.checked_sub(5), width.checked_sub(10), tiles::PLATFORM);
    place(&mut grid, height.checked_sub(5), width.checked_sub(9), tiles::PLATFORM);
    place(&mut grid, height.checked_sub(5), width.checked_sub(8), tiles::PLATFORM);

    // One spike on the ground
    place(&mut grid, height.checked_sub(2), width.checked_sub(6), tiles::SPIKE);

    grid
}

/// Place a tile if both coordinates resolved to valid offsets
fn place(grid: &mut TileGrid, y: Option<usize>, x: Option<usize>, code: u16) {
    if let (Some(y), Some(x)) = (y, x) {
        if let Some(cell) = grid.get_mut(y).and_then(|row| row.get_mut(x)) {
            *cell = code;
        }
    }
}

/// Sanitize a level name into a camelCase identifier token
///
/// Non-alphanumeric characters split words; the first word is lowercased and
/// later words are capitalized. Distinct names may collide to the same token;
/// callers accept that.
pub fn name_to_identifier(name: &str) -> String {
    let mut out = String::new();
    for (i, word) in name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        if i == 0 {
            out.push_str(&word.to_ascii_lowercase());
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(&chars.as_str().to_ascii_lowercase());
            }
        }
    }
    out
}
