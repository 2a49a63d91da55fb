//! Shared viewport negotiation.
//!
//! Every participant sees the same terminal, so the process is sized to the
//! smallest reported viewport.

use collab_terminal::{DEFAULT_COLS, DEFAULT_ROWS};
use serde::Serialize;

pub const MIN_COLS: u16 = 20;
pub const MAX_COLS: u16 = 500;
pub const MIN_ROWS: u16 = 5;
pub const MAX_ROWS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewportSize {
    pub cols: u16,
    pub rows: u16,
}

impl ViewportSize {
    /// Accept a client report only within 20..=500 columns and 5..=200 rows.
    pub fn from_report(cols: u32, rows: u32) -> Option<Self> {
        let cols = u16::try_from(cols).ok()?;
        let rows = u16::try_from(rows).ok()?;
        ((MIN_COLS..=MAX_COLS).contains(&cols) && (MIN_ROWS..=MAX_ROWS).contains(&rows))
            .then_some(Self { cols, rows })
    }
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Coordinate-wise minimum of `sizes`, starting from the default size and
/// floored at 20x5.
pub fn effective_size(sizes: impl IntoIterator<Item = ViewportSize>) -> ViewportSize {
    let min = sizes
        .into_iter()
        .fold(ViewportSize::default(), |acc, s| ViewportSize {
            cols: acc.cols.min(s.cols),
            rows: acc.rows.min(s.rows),
        });
    ViewportSize {
        cols: min.cols.max(MIN_COLS),
        rows: min.rows.max(MIN_ROWS),
    }
}
