//! Active set - messages currently scrolling across the viewport
//!
//! Stored per lane (keyed by the message's top row), each lane sorted by x.
//! A message taller than one row spans `row_span` lanes but lives only in
//! the lane of its top row; `occupants` accounts for that.

use std::ops::Range;

use serde::Serialize;
use tracing::trace;

use super::message::{ChatMessage, Segment};

/// A placed, moving message
#[derive(Debug, Clone)]
pub struct ActiveMessage {
    pub seq: u64,
    pub message: ChatMessage,
    pub segments: Vec<Segment>,
    pub row: usize,
    pub row_span: usize,
    /// Left edge (px). Starts at the viewport's right edge.
    pub x: f32,
    pub width: f32,
    pub height: f32,
    /// px/sec, fixed at placement
    pub speed: f32,
    pub arrived_at: f64,
    pub placed_at: f64,
}

impl ActiveMessage {
    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Right (trailing) edge
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn rows(&self) -> Range<usize> {
        self.row..self.row + self.row_span
    }

    /// Fully past the left edge
    pub fn has_exited(&self) -> bool {
        self.right() < 0.0
    }
}

/// Host-facing snapshot of a newly spawned message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpawnView {
    pub id: String,
    pub username: String,
    pub row: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub speed: f32,
    pub segments: Vec<Segment>,
}

/// Per-frame position of an active message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: String,
    pub row: usize,
    pub x: f32,
    pub y: f32,
}

/// Everything the host needs to render one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameUpdate {
    pub spawned: Vec<SpawnView>,
    pub moved: Vec<Position>,
    pub removed: Vec<String>,
}

impl FrameUpdate {
    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty() && self.moved.is_empty() && self.removed.is_empty()
    }
}

/// Row reassignments made by `ActiveSet::reflow`
#[derive(Debug, Default)]
pub struct Reflow {
    /// `(id, new_row)` for every message whose row changed
    pub moved: Vec<(String, usize)>,
    pub evicted: Vec<ActiveMessage>,
}

/// Two messages sharing a row never overlap while the leading one is on screen.
///
/// Speeds are constant, so the follower can only close the gap if it is faster.
pub fn never_collide(a: &ActiveMessage, b: &ActiveMessage) -> bool {
    let (lead, follow) = if a.x <= b.x { (a, b) } else { (b, a) };
    let gap = follow.x - lead.right();
    if gap < 0.0 {
        return false;
    }
    if follow.speed <= lead.speed {
        return true;
    }
    if lead.speed <= 0.0 {
        return false;
    }
    gap / (follow.speed - lead.speed) >= lead.right().max(0.0) / lead.speed
}

/// Lane-indexed collection of active messages
#[derive(Debug)]
pub struct ActiveSet {
    lanes: Vec<Vec<ActiveMessage>>,
    count: usize,
    /// Tallest span seen since the last clear; bounds the occupant scan upward
    max_span: usize,
}

impl ActiveSet {
    pub fn new(row_count: usize) -> Self {
        Self {
            lanes: (0..row_count.max(1)).map(|_| Vec::new()).collect(),
            count: 0,
            max_span: 1,
        }
    }

    pub fn row_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Messages whose top row is `row`, sorted by x
    pub fn lane(&self, row: usize) -> &[ActiveMessage] {
        self.lanes.get(row).map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveMessage> {
        self.lanes.iter().flatten()
    }

    pub fn get(&self, id: &str, row: usize) -> Option<&ActiveMessage> {
        self.lane(row).iter().find(|m| m.id() == id)
    }

    /// Every active message whose vertical band intersects `rows`
    pub fn occupants(&self, rows: Range<usize>) -> impl Iterator<Item = &ActiveMessage> + '_ {
        let first = rows.start.saturating_sub(self.max_span - 1);
        let last = rows.end.min(self.lanes.len());
        let wanted = rows.clone();
        self.lanes[first.min(last)..last]
            .iter()
            .flatten()
            .filter(move |m| m.row < wanted.end && wanted.start < m.row + m.row_span)
    }

    pub fn insert(&mut self, msg: ActiveMessage) {
        let row = msg.row.min(self.lanes.len() - 1);
        self.max_span = self.max_span.max(msg.row_span);
        let lane = &mut self.lanes[row];
        let pos = lane.partition_point(|m| m.x <= msg.x);
        lane.insert(pos, msg);
        self.count += 1;
    }

    pub fn remove(&mut self, id: &str, row: usize) -> Option<ActiveMessage> {
        let lane = self.lanes.get_mut(row)?;
        let pos = lane.iter().position(|m| m.id() == id)?;
        self.count -= 1;
        Some(lane.remove(pos))
    }

    /// Move every message left by `speed * dt`; return the ones that left the viewport.
    pub fn advance(&mut self, dt_secs: f32) -> Vec<ActiveMessage> {
        let mut exited = Vec::new();
        for lane in &mut self.lanes {
            for msg in lane.iter_mut() {
                msg.x -= msg.speed * dt_secs;
            }
            let mut i = 0;
            while i < lane.len() {
                if lane[i].has_exited() {
                    exited.push(lane.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        self.count -= exited.len();
        if !exited.is_empty() {
            trace!(count = exited.len(), remaining = self.count, "Messages exited viewport");
        }
        exited
    }

    /// Resize to `row_count` lanes. Messages that no longer fit move to the
    /// nearest lower row they can share without ever colliding; x is untouched.
    /// A message with no such row is evicted.
    pub fn reflow(&mut self, row_count: usize) -> Reflow {
        let row_count = row_count.max(1);
        let mut all: Vec<ActiveMessage> = self.lanes.drain(..).flatten().collect();
        self.lanes = (0..row_count).map(|_| Vec::new()).collect();
        self.count = 0;
        self.max_span = 1;

        all.sort_by(|a, b| a.x.total_cmp(&b.x));
        let mut displaced = Vec::new();
        for mut msg in all {
            msg.row_span = msg.row_span.min(row_count);
            if msg.row + msg.row_span <= row_count {
                self.insert(msg);
            } else {
                displaced.push(msg);
            }
        }

        let mut result = Reflow::default();
        for mut msg in displaced {
            let max_row = row_count - msg.row_span;
            let free = (0..=max_row).rev().find(|&row| {
                self.occupants(row..row + msg.row_span)
                    .all(|other| never_collide(other, &msg))
            });
            match free {
                Some(row) => {
                    msg.row = row;
                    result.moved.push((msg.message.id.clone(), row));
                    self.insert(msg);
                }
                None => {
                    trace!(id = msg.id(), "No collision-free row after reflow, evicting");
                    result.evicted.push(msg);
                }
            }
        }
        result
    }

    /// Empty every lane, returning the ids that were active
    pub fn clear(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.iter().map(|m| m.message.id.clone()).collect();
        for lane in &mut self.lanes {
            lane.clear();
        }
        self.count = 0;
        self.max_span = 1;
        ids
    }
}
