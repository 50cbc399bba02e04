//! Placement engine - collision-avoiding lane assignment
//!
//! Rows are discrete lanes derived from viewport height and font size.
//! A candidate spawns at the viewport's right edge and is accepted in the
//! first (top-most) row where, against every active message sharing its
//! vertical band:
//! - the occupant has cleared the spawn point by `h_gap`, and
//! - if the candidate is faster, it cannot catch the occupant before the
//!   occupant has fully left the screen.

use std::ops::Range;

use tracing::trace;

use super::active::{ActiveMessage, ActiveSet};
use super::config::{OverlayConfig, FONT_SIZE_RATIO, MAX_FONT_SIZE, MIN_FONT_SIZE};

/// Base font size before the user scale: 3.5% of viewport height, clamped to [24, 100]
pub fn base_font_size(viewport_height: f32) -> f32 {
    (viewport_height * FONT_SIZE_RATIO).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Effective font size with the user scale applied
pub fn font_size(viewport_height: f32, scale: f32) -> f32 {
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    base_font_size(viewport_height) * scale
}

/// Pixel height of one lane
pub fn row_height(font_size: f32, config: &OverlayConfig) -> f32 {
    font_size * config.line_height + config.v_gap
}

/// Number of lanes that fit the viewport (at least one)
pub fn compute_row_count(viewport_height: f32, font_size: f32, config: &OverlayConfig) -> usize {
    let h = row_height(font_size, config);
    if h.is_nan() || h <= 0.0 || !viewport_height.is_finite() {
        return 1;
    }
    ((viewport_height / h).floor() as usize).max(1)
}

/// Lane geometry for the current viewport and settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneGeometry {
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub font_size: f32,
    pub row_height: f32,
    pub row_count: usize,
    pub h_gap: f32,
}

impl LaneGeometry {
    pub fn new(viewport_width: f32, viewport_height: f32, scale: f32, config: &OverlayConfig) -> Self {
        let font_size = font_size(viewport_height, scale);
        Self {
            viewport_width,
            viewport_height,
            font_size,
            row_height: row_height(font_size, config),
            row_count: compute_row_count(viewport_height, font_size, config),
            h_gap: config.h_gap,
        }
    }

    /// Top y coordinate of a row
    pub fn row_y(&self, row: usize) -> f32 {
        row as f32 * self.row_height
    }

    /// Rows a message of `height` occupies, clamped to the lane count
    pub fn row_span(&self, height: f32) -> usize {
        let span = if self.row_height > 0.0 {
            (height / self.row_height).ceil() as usize
        } else {
            1
        };
        span.clamp(1, self.row_count.max(1))
    }
}

/// Measured candidate awaiting a lane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub width: f32,
    pub height: f32,
    /// px/sec
    pub speed: f32,
}

/// Outcome of one placement attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlacementResult {
    Placed { row: usize, row_span: usize, x: f32, speed: f32 },
    NoLane,
}

impl PlacementResult {
    pub fn is_placed(&self) -> bool {
        matches!(self, PlacementResult::Placed { .. })
    }
}

/// Why a row was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowConflict {
    /// An occupant has not yet cleared the spawn point
    SpawnGap,
    /// The candidate would catch a slower occupant on screen
    Overtake,
}

/// Spawn gap check: the occupant's trailing edge is at least `h_gap` left of the spawn point
pub fn spawn_gap_clear(other: &ActiveMessage, viewport_width: f32, h_gap: f32) -> bool {
    other.right() <= viewport_width - h_gap
}

/// Overtake check for a candidate spawning at `viewport_width` behind `other`.
///
/// `time_to_catch = gap / (candidate - other)`, `time_to_exit = other.right / other.speed`.
/// Safe when the candidate is not faster, or catches up no earlier than the occupant exits.
pub fn overtake_safe(candidate_speed: f32, other: &ActiveMessage, viewport_width: f32) -> bool {
    if candidate_speed <= other.speed {
        return true;
    }
    if other.speed <= 0.0 {
        return false;
    }
    let gap = viewport_width - other.right();
    if gap <= 0.0 {
        return false;
    }
    let time_to_catch = gap / (candidate_speed - other.speed);
    let time_to_exit = other.right().max(0.0) / other.speed;
    time_to_catch >= time_to_exit
}

/// Check a band of rows against all occupants intersecting it
pub fn check_rows(
    candidate: &Candidate,
    rows: Range<usize>,
    active: &ActiveSet,
    geometry: &LaneGeometry,
) -> Result<(), RowConflict> {
    for other in active.occupants(rows) {
        if !spawn_gap_clear(other, geometry.viewport_width, geometry.h_gap) {
            return Err(RowConflict::SpawnGap);
        }
        if !overtake_safe(candidate.speed, other, geometry.viewport_width) {
            return Err(RowConflict::Overtake);
        }
    }
    Ok(())
}

/// Scan rows top to bottom and take the first one that passes every check
pub fn try_place(candidate: &Candidate, active: &ActiveSet, geometry: &LaneGeometry) -> PlacementResult {
    let row_count = geometry.row_count.min(active.row_count());
    let span = geometry.row_span(candidate.height).min(row_count.max(1));

    for row in 0..=(row_count.saturating_sub(span)) {
        match check_rows(candidate, row..row + span, active, geometry) {
            Ok(()) => {
                return PlacementResult::Placed {
                    row,
                    row_span: span,
                    x: geometry.viewport_width,
                    speed: candidate.speed,
                };
            }
            Err(conflict) => {
                trace!(row, ?conflict, "Row rejected");
            }
        }
    }

    PlacementResult::NoLane
}
