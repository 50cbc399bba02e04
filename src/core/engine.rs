//! Danmaku engine - hold → pending → active pipeline
//!
//! Single-writer: every mutation goes through `&mut self`. The host calls
//! `tick` once per display frame and `handle_event` (or the deletion
//! methods directly) between frames.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::active::{ActiveMessage, ActiveSet, FrameUpdate, Position, SpawnView};
use super::config::{OverlayConfig, Settings};
use super::index::{GeometryIndex, Stage};
use super::measure::Measure;
use super::message::{fold_username, has_visible_content, render_segments, ChatEvent, ChatMessage};
use super::placement::{try_place, Candidate, LaneGeometry, PlacementResult};
use super::queues::{HoldQueue, PendingQueue, QueuedMessage};
use super::rate::{RateController, RateDecision};

/// Why a message was turned away at intake
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("message has no id")]
    MissingId,
    #[error("message has no text")]
    MissingText,
    #[error("message id is already outstanding")]
    Duplicate,
    #[error("blocked by blocklist entry {0:?}")]
    Blocked(String),
    #[error("nothing left to display after visibility filters")]
    NothingVisible,
}

/// Result of `admit`
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Held { release_at: f64 },
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_held(&self) -> bool {
        matches!(self, Admission::Held { .. })
    }
}

/// Result of `handle_event`
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Admitted(Admission),
    Deleted(usize),
    Cleared,
}

/// Running counters since engine creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub admitted: u64,
    pub rejected: u64,
    /// Dropped by pending-queue backpressure
    pub dropped: u64,
    pub placed: u64,
    /// Left the viewport normally
    pub expired: u64,
    pub deleted: u64,
    /// Removed because a lane reflow left no safe row
    pub evicted: u64,
    pub frames: u64,
}

/// The overlay core. Owns every stage and the index that routes between them.
#[derive(Debug)]
pub struct DanmakuEngine {
    config: OverlayConfig,
    rate: RateController,
    index: GeometryIndex,
    hold: HoldQueue,
    pending: PendingQueue,
    active: ActiveSet,
    geometry: LaneGeometry,
    last_decision: RateDecision,
    /// Deleted while active; reported in the next frame
    removed_since_frame: Vec<String>,
    stats: EngineStats,
}

impl DanmakuEngine {
    pub fn new(config: OverlayConfig, viewport_width: f32, viewport_height: f32, settings: &Settings) -> Self {
        let geometry = LaneGeometry::new(viewport_width, viewport_height, settings.scale, &config);
        let rate = RateController::new(config.rate_steps.clone(), config.drain_budget);
        info!(
            viewport_width,
            viewport_height,
            rows = geometry.row_count,
            font_size = geometry.font_size,
            max_pending = config.max_pending,
            "Danmaku engine created"
        );
        Self {
            pending: PendingQueue::new(config.max_pending),
            active: ActiveSet::new(geometry.row_count),
            last_decision: rate.evaluate(0),
            rate,
            index: GeometryIndex::new(),
            hold: HoldQueue::new(),
            geometry,
            removed_since_frame: Vec::new(),
            stats: EngineStats::default(),
            config,
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Route one upstream event. Deletions apply immediately.
    pub fn handle_event(&mut self, event: ChatEvent, settings: &Settings, now: f64) -> EventOutcome {
        trace!(kind = event.kind(), now, "Handling event");
        match event {
            ChatEvent::ChatMessageArrived(msg) => EventOutcome::Admitted(self.admit(msg, settings, now)),
            ChatEvent::MessageDeleted { id } => EventOutcome::Deleted(usize::from(self.delete_by_id(&id))),
            ChatEvent::UserTimedOut { username } => EventOutcome::Deleted(self.delete_by_user(&username)),
            ChatEvent::ChatCleared => {
                self.clear_all();
                EventOutcome::Cleared
            }
        }
    }

    /// Validate a message and put it in the hold stage
    pub fn admit(&mut self, msg: ChatMessage, settings: &Settings, now: f64) -> Admission {
        if let Err(reason) = self.validate(&msg, settings) {
            self.stats.rejected += 1;
            match reason {
                RejectReason::MissingId | RejectReason::MissingText => {
                    warn!(id = %msg.id, user = %msg.username, %reason, "Malformed message dropped")
                }
                _ => debug!(id = %msg.id, user = %msg.username, %reason, "Message rejected"),
            }
            return Admission::Rejected(reason);
        }

        let user = msg.user_key();
        let seq = self.index.insert(&msg.id, &user);
        let release_at = now + self.config.hold_delay_ms;
        debug!(id = %msg.id, user = %user, seq, release_at, "Message held");

        self.hold.push(QueuedMessage {
            seq,
            message: msg,
            arrived_at: now,
            hold_release_at: release_at,
            pending_since: None,
        });
        self.stats.admitted += 1;
        Admission::Held { release_at }
    }

    fn validate(&self, msg: &ChatMessage, settings: &Settings) -> Result<(), RejectReason> {
        if msg.id.trim().is_empty() {
            return Err(RejectReason::MissingId);
        }
        if msg.text.trim().is_empty() {
            return Err(RejectReason::MissingText);
        }
        if self.index.contains(&msg.id) {
            return Err(RejectReason::Duplicate);
        }
        if let Some(entry) = settings.blocked_by(&msg.username, &msg.text) {
            return Err(RejectReason::Blocked(entry.to_string()));
        }
        if !has_visible_content(&render_segments(msg, settings)) {
            return Err(RejectReason::NothingVisible);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------------

    /// Remove one message from whichever stage holds it. Unknown ids are a no-op.
    pub fn delete_by_id(&mut self, id: &str) -> bool {
        let Some(entry) = self.index.remove(id) else {
            trace!(id, "Delete for unknown id ignored");
            return false;
        };

        match entry.stage {
            Stage::Hold => self.hold.mark_removed(),
            Stage::Pending => self.pending.mark_removed(),
            Stage::Active { row } => {
                if self.active.remove(id, row).is_none() {
                    warn!(id, row, "Indexed active message missing from its lane");
                }
                self.removed_since_frame.push(id.to_string());
            }
        }

        self.stats.deleted += 1;
        debug!(id, stage = ?entry.stage, "Message deleted");
        true
    }

    /// Remove every outstanding message from a user. Returns how many were removed.
    pub fn delete_by_user(&mut self, username: &str) -> usize {
        let user = fold_username(username);
        let ids = self.index.ids_for_user(&user);
        let removed = ids.iter().filter(|id| self.delete_by_id(id)).count();
        if removed > 0 {
            debug!(user = %user, removed, "User messages deleted");
        }
        removed
    }

    /// Drop everything in every stage
    pub fn clear_all(&mut self) {
        let held = self.hold.len();
        let pending = self.pending.len();
        let active_ids = self.active.clear();
        info!(held, pending, active = active_ids.len(), "Clearing all messages");

        self.stats.deleted += (held + pending + active_ids.len()) as u64;
        self.removed_since_frame.extend(active_ids);
        self.hold.clear();
        self.pending.clear();
        self.index.clear();
    }

    // ------------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------------

    /// Run one frame: promote held messages, place up to the drain budget,
    /// then advance everything on screen by `dt_secs`.
    pub fn tick<M: Measure + ?Sized>(
        &mut self,
        now: f64,
        dt_secs: f32,
        settings: &Settings,
        measure: &M,
    ) -> FrameUpdate {
        self.stats.frames += 1;
        self.sync_scale(settings);
        self.promote(now);

        let decision = self.rate.evaluate(self.pending.len());
        self.last_decision = decision;
        let placed = self.drain(decision, now, settings, measure);

        let dt = if dt_secs.is_finite() && dt_secs > 0.0 { dt_secs } else { 0.0 };
        let mut removed = std::mem::take(&mut self.removed_since_frame);
        for msg in self.active.advance(dt) {
            self.index.remove(msg.id());
            self.stats.expired += 1;
            removed.push(msg.message.id);
        }

        let spawned_ids: HashSet<&str> = placed.iter().map(|(id, _)| id.as_str()).collect();
        let spawned = placed
            .iter()
            .filter_map(|(id, row)| self.active.get(id, *row))
            .map(|m| self.spawn_view(m))
            .collect();
        let moved = self
            .active
            .iter()
            .filter(|m| !spawned_ids.contains(m.id()))
            .map(|m| Position {
                id: m.message.id.clone(),
                row: m.row,
                x: m.x,
                y: self.geometry.row_y(m.row),
            })
            .collect();

        FrameUpdate { spawned, moved, removed }
    }

    /// Hold → pending for every message whose grace period is over
    fn promote(&mut self, now: f64) {
        for mut msg in self.hold.release_due(now, &self.index) {
            if self.pending.is_full() {
                self.drop_overflow(&msg);
                continue;
            }
            self.index.set_stage(msg.id(), Stage::Pending);
            msg.pending_since = Some(now);
            if let Err(msg) = self.pending.try_push(msg, &self.index) {
                self.drop_overflow(&msg);
            }
        }
    }

    fn drop_overflow(&mut self, msg: &QueuedMessage) {
        self.index.remove(msg.id());
        self.stats.dropped += 1;
        debug!(id = msg.id(), pending = self.pending.len(), "Pending queue full, message dropped");
    }

    /// Up to `decision.budget` placement attempts in FIFO order.
    /// Returns `(id, row)` of every message placed.
    fn drain<M: Measure + ?Sized>(
        &mut self,
        decision: RateDecision,
        now: f64,
        settings: &Settings,
        measure: &M,
    ) -> Vec<(String, usize)> {
        let mut placed = Vec::new();
        let mut unplaced = Vec::new();
        let user_speed = if settings.speed_multiplier.is_finite() && settings.speed_multiplier > 0.0 {
            settings.speed_multiplier
        } else {
            1.0
        };
        let speed = self.config.base_speed * user_speed * decision.multiplier;

        for _ in 0..decision.budget {
            let Some(queued) = self.pending.pop_live(&self.index) else {
                break;
            };

            let segments = render_segments(&queued.message, settings);
            if !has_visible_content(&segments) {
                self.index.remove(queued.id());
                self.stats.rejected += 1;
                debug!(id = queued.id(), "Nothing visible at placement, message dropped");
                continue;
            }

            let size = measure.measure(&segments, self.geometry.font_size);
            let candidate = Candidate {
                width: size.width.max(0.0),
                height: size.height.max(0.0),
                speed,
            };

            match try_place(&candidate, &self.active, &self.geometry) {
                PlacementResult::Placed { row, row_span, x, speed } => {
                    debug!(id = queued.id(), row, speed, width = candidate.width, "Message placed");
                    self.index.set_stage(queued.id(), Stage::Active { row });
                    placed.push((queued.message.id.clone(), row));
                    self.active.insert(ActiveMessage {
                        seq: queued.seq,
                        segments,
                        row,
                        row_span,
                        x,
                        width: candidate.width,
                        height: candidate.height,
                        speed,
                        arrived_at: queued.arrived_at,
                        placed_at: now,
                        message: queued.message,
                    });
                    self.stats.placed += 1;
                }
                PlacementResult::NoLane => {
                    trace!(id = queued.id(), "No lane this frame");
                    unplaced.push(queued);
                }
            }
        }

        self.pending.requeue_front(unplaced);
        placed
    }

    fn spawn_view(&self, m: &ActiveMessage) -> SpawnView {
        SpawnView {
            id: m.message.id.clone(),
            username: m.message.username.clone(),
            row: m.row,
            x: m.x,
            y: self.geometry.row_y(m.row),
            width: m.width,
            height: m.height,
            speed: m.speed,
            segments: m.segments.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    /// Recompute lanes for a new viewport. Active messages that no longer fit
    /// move to the nearest valid row; x is left alone.
    pub fn resize(&mut self, viewport_width: f32, viewport_height: f32, settings: &Settings) {
        let geometry = LaneGeometry::new(viewport_width, viewport_height, settings.scale, &self.config);
        self.apply_geometry(geometry);
    }

    fn sync_scale(&mut self, settings: &Settings) {
        let geometry = LaneGeometry::new(
            self.geometry.viewport_width,
            self.geometry.viewport_height,
            settings.scale,
            &self.config,
        );
        if geometry != self.geometry {
            self.apply_geometry(geometry);
        }
    }

    fn apply_geometry(&mut self, geometry: LaneGeometry) {
        let old_rows = self.geometry.row_count;
        self.geometry = geometry;
        if geometry.row_count == old_rows {
            return;
        }

        let reflow = self.active.reflow(geometry.row_count);
        for (id, row) in &reflow.moved {
            self.index.set_stage(id, Stage::Active { row: *row });
        }
        for msg in &reflow.evicted {
            self.index.remove(msg.id());
            self.removed_since_frame.push(msg.message.id.clone());
        }
        self.stats.evicted += reflow.evicted.len() as u64;
        info!(
            old_rows,
            new_rows = geometry.row_count,
            reassigned = reflow.moved.len(),
            evicted = reflow.evicted.len(),
            "Lanes recomputed"
        );
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn geometry(&self) -> &LaneGeometry {
        &self.geometry
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Rate decision from the most recent frame
    pub fn last_decision(&self) -> RateDecision {
        self.last_decision
    }

    pub fn index(&self) -> &GeometryIndex {
        &self.index
    }

    pub fn stage_of(&self, id: &str) -> Option<Stage> {
        self.index.get(id).map(|e| e.stage)
    }

    pub fn hold_len(&self) -> usize {
        self.hold.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn active_messages(&self) -> impl Iterator<Item = &ActiveMessage> {
        self.active.iter()
    }

    /// Live held messages in release order
    pub fn held_messages(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.hold.iter_live(&self.index)
    }

    /// Live pending messages in FIFO order
    pub fn pending_messages(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.pending.iter_live(&self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HOLD_DELAY_MS;
    use crate::core::measure::EstimateMeasure;

    const FRAME: f32 = 1.0 / 60.0;
    const FRAME_MS: f64 = 1000.0 / 60.0;

    fn engine() -> DanmakuEngine {
        DanmakuEngine::new(OverlayConfig::default(), 1280.0, 720.0, &Settings::default())
    }

    fn msg(id: &str, user: &str) -> ChatMessage {
        ChatMessage::new(id, user, format!("message {}", id))
    }

    /// Ids currently found in each stage
    fn stage_ids(e: &DanmakuEngine) -> (Vec<String>, Vec<String>, Vec<String>) {
        (
            e.held_messages().map(|m| m.message.id.clone()).collect(),
            e.pending_messages().map(|m| m.message.id.clone()).collect(),
            e.active_messages().map(|m| m.message.id.clone()).collect(),
        )
    }

    fn assert_single_stage(e: &DanmakuEngine) {
        let (hold, pending, active) = stage_ids(e);
        let total = hold.len() + pending.len() + active.len();
        let unique: HashSet<&String> = hold.iter().chain(&pending).chain(&active).collect();
        assert_eq!(unique.len(), total, "an id appears in more than one stage");
        assert_eq!(e.index().len(), total, "index out of sync with stages");
    }

    fn assert_no_overlap(e: &DanmakuEngine) {
        let msgs: Vec<&ActiveMessage> = e.active_messages().collect();
        for (i, a) in msgs.iter().enumerate() {
            for b in &msgs[i + 1..] {
                let share_row = a.row < b.row + b.row_span && b.row < a.row + a.row_span;
                if !share_row {
                    continue;
                }
                // half-pixel slack for f32 drift over many frames
                let overlap = a.x < b.right() - 0.5 && b.x < a.right() - 0.5;
                assert!(
                    !overlap,
                    "{} [{}, {}] overlaps {} [{}, {}] in row {}",
                    a.id(), a.x, a.right(), b.id(), b.x, b.right(), a.row
                );
            }
        }
    }

    /// Step the engine frame by frame from `from` for `frames` frames
    fn run(e: &mut DanmakuEngine, settings: &Settings, from: f64, frames: usize) -> f64 {
        let measure = EstimateMeasure::default();
        let mut now = from;
        for _ in 0..frames {
            now += FRAME_MS;
            e.tick(now, FRAME, settings, &measure);
            assert_single_stage(e);
            assert_no_overlap(e);
        }
        now
    }

    #[test]
    fn test_hold_delay_is_respected() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();

        assert!(e.admit(msg("m1", "alice"), &settings, 0.0).is_held());
        e.tick(HOLD_DELAY_MS - 1.0, FRAME, &settings, &measure);
        assert_eq!(e.stage_of("m1"), Some(Stage::Hold));

        // Budget 0 so it stays pending and we can inspect it
        let config = OverlayConfig { drain_budget: 0, ..OverlayConfig::default() };
        let mut e = DanmakuEngine::new(config, 1280.0, 720.0, &settings);
        e.admit(msg("m1", "alice"), &settings, 100.0);
        e.tick(100.0 + HOLD_DELAY_MS, FRAME, &settings, &measure);
        let pending: Vec<&QueuedMessage> = e.pending_messages().collect();
        assert_eq!(pending.len(), 1);
        let waited = pending[0].pending_since.unwrap() - pending[0].arrived_at;
        assert!(waited >= HOLD_DELAY_MS);
    }

    #[test]
    fn test_delete_during_hold_never_displays() {
        let mut e = engine();
        let settings = Settings::default();

        e.admit(msg("m1", "alice"), &settings, 0.0);
        assert!(e.delete_by_id("m1"));

        let measure = EstimateMeasure::default();
        let mut now = 1000.0;
        for _ in 0..600 {
            now += FRAME_MS;
            let frame = e.tick(now, FRAME, &settings, &measure);
            assert!(frame.spawned.iter().all(|s| s.id != "m1"));
            assert!(e.pending_messages().all(|m| m.id() != "m1"));
        }
        assert_eq!(e.active_len(), 0);
        assert_eq!(e.stats().placed, 0);
    }

    #[test]
    fn test_backlog_doubles_speed() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();

        for i in 0..30 {
            e.admit(msg(&format!("m{}", i), "alice"), &settings, 0.0);
        }
        let frame = e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);

        assert_eq!(e.last_decision().multiplier, 2.0);
        assert_eq!(frame.spawned.len(), DRAIN_BUDGET);
        assert_eq!(frame.spawned[0].id, "m0");
        assert_eq!(frame.spawned[0].speed, e.config().base_speed * 2.0);
        assert_eq!(e.pending_len(), 30 - DRAIN_BUDGET);
    }

    const DRAIN_BUDGET: usize = crate::core::config::DRAIN_BUDGET_PER_FRAME;

    #[test]
    fn test_full_pending_drops_newest() {
        let config = OverlayConfig {
            max_pending: 5,
            drain_budget: 0,
            ..OverlayConfig::default()
        };
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        let mut e = DanmakuEngine::new(config, 1280.0, 720.0, &settings);

        for i in 0..5 {
            e.admit(msg(&format!("m{}", i), "alice"), &settings, 0.0);
        }
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        assert_eq!(e.pending_len(), 5);

        e.admit(msg("late", "alice"), &settings, HOLD_DELAY_MS);
        e.tick(2.0 * HOLD_DELAY_MS, FRAME, &settings, &measure);

        assert_eq!(e.pending_len(), 5);
        assert_eq!(e.stage_of("late"), None);
        assert!(!e.delete_by_id("late"));
        assert_eq!(e.stats().dropped, 1);
        assert_single_stage(&e);
    }

    // A faster follower waits until it cannot catch the leader
    #[test]
    fn test_faster_follower_waits_for_leader_to_clear() {
        // 40px tall viewport: font clamps to 24, a single 32.8px lane
        let mut e = DanmakuEngine::new(OverlayConfig::default(), 1000.0, 40.0, &Settings::default());
        assert_eq!(e.geometry().row_count, 1);
        let measure = EstimateMeasure::default();

        let slow = Settings::default();
        e.admit(msg("leader", "alice"), &slow, 0.0);
        e.tick(HOLD_DELAY_MS, 0.0, &slow, &measure);
        assert_eq!(e.stage_of("leader"), Some(Stage::Active { row: 0 }));

        let fast = Settings { speed_multiplier: 3.0, ..Settings::default() };
        e.admit(msg("follower", "bob"), &fast, HOLD_DELAY_MS);

        // Leader at 160 px/s, follower at 480 px/s from x = 1000:
        // safe once 1000 - R >= 2R, i.e. R <= 333.3
        let mut now = HOLD_DELAY_MS;
        let mut spawned_at_right = None;
        for _ in 0..2000 {
            let leader_right = e.active_messages().find(|m| m.id() == "leader").map(|m| m.right());
            now += FRAME_MS;
            let frame = e.tick(now, FRAME, &fast, &measure);
            if frame.spawned.iter().any(|s| s.id == "follower") {
                spawned_at_right = leader_right;
                break;
            }
            assert_no_overlap(&e);
        }

        let right = spawned_at_right.expect("follower never placed");
        assert!(right <= 1000.0 / 3.0 + 1e-2, "placed too early, leader right edge {}", right);
        assert!(right > 1000.0 / 3.0 - 5.0, "placed later than necessary, leader right edge {}", right);
    }

    #[test]
    fn test_clear_all_empties_every_stage() {
        let config = OverlayConfig { drain_budget: 5, ..OverlayConfig::default() };
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        let mut e = DanmakuEngine::new(config, 1280.0, 720.0, &settings);

        for i in 0..10 {
            e.admit(msg(&format!("a{}", i), "alice"), &settings, 0.0);
        }
        // 5 placed, 5 left pending
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        for i in 0..5 {
            e.admit(msg(&format!("h{}", i), "bob"), &settings, HOLD_DELAY_MS);
        }
        assert_eq!((e.hold_len(), e.pending_len(), e.active_len()), (5, 5, 5));

        e.clear_all();
        assert_eq!((e.hold_len(), e.pending_len(), e.active_len()), (0, 0, 0));
        assert!(e.index().is_empty());
        assert_eq!(e.index().user_count(), 0);

        let frame = e.tick(HOLD_DELAY_MS + FRAME_MS, FRAME, &settings, &measure);
        assert_eq!(frame.removed.len(), 5);
        assert!(frame.spawned.is_empty());

        // Nothing resurrects from old queue slots
        run(&mut e, &settings, HOLD_DELAY_MS * 3.0, 30);
        assert_eq!(e.stats().placed, 5);
    }

    #[test]
    fn test_delete_by_user_across_stages() {
        let config = OverlayConfig { drain_budget: 1, ..OverlayConfig::default() };
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        let mut e = DanmakuEngine::new(config, 1280.0, 720.0, &settings);

        e.admit(msg("b1", "Bob"), &settings, 0.0);
        e.admit(msg("b2", "bob"), &settings, 0.0);
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        e.admit(msg("b3", "BOB"), &settings, HOLD_DELAY_MS);
        e.admit(msg("a1", "alice"), &settings, HOLD_DELAY_MS);

        assert_eq!(e.stage_of("b1"), Some(Stage::Active { row: 0 }));
        assert_eq!(e.stage_of("b2"), Some(Stage::Pending));
        assert_eq!(e.stage_of("b3"), Some(Stage::Hold));

        assert_eq!(e.delete_by_user("bob"), 3);
        assert!(e.index().ids_for_user("bob").is_empty());
        assert_eq!(e.stage_of("a1"), Some(Stage::Hold));
        assert_eq!((e.hold_len(), e.pending_len(), e.active_len()), (1, 0, 0));

        let frame = e.tick(HOLD_DELAY_MS + FRAME_MS, FRAME, &settings, &measure);
        assert_eq!(frame.removed, vec!["b1".to_string()]);
        assert_eq!(e.delete_by_user("bob"), 0);
    }

    #[test]
    fn test_delete_by_id_is_idempotent() {
        let mut e = engine();
        let settings = Settings::default();
        e.admit(msg("m1", "alice"), &settings, 0.0);

        assert!(e.delete_by_id("m1"));
        assert!(!e.delete_by_id("m1"));
        assert!(!e.delete_by_id("never-seen"));
        assert_eq!(e.stats().deleted, 1);
        assert_eq!(e.hold_len(), 0);
    }

    #[test]
    fn test_readmission_after_user_delete_is_fresh() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();

        e.admit(msg("b1", "bob"), &settings, 0.0);
        assert_eq!(e.delete_by_user("bob"), 1);

        assert!(e.admit(msg("b1", "bob"), &settings, 10.0).is_held());
        assert_eq!(e.index().ids_for_user("bob"), vec!["b1".to_string()]);
        assert_eq!(e.hold_len(), 1);

        // The stale hold slot is skipped; the fresh one is placed exactly once
        let frame = e.tick(10.0 + HOLD_DELAY_MS, FRAME, &settings, &measure);
        assert_eq!(frame.spawned.len(), 1);
        assert_eq!(e.active_len(), 1);
        assert_single_stage(&e);
    }

    #[test]
    fn test_intake_rejections() {
        let mut e = engine();
        let settings = Settings {
            blocklist: vec!["spammer".into(), "free coins".into()],
            ..Settings::default()
        };

        let cases = [
            (ChatMessage::new("", "alice", "hi"), RejectReason::MissingId),
            (ChatMessage::new("m1", "alice", "   "), RejectReason::MissingText),
            (ChatMessage::new("m2", "Spammer", "hi"), RejectReason::Blocked("spammer".into())),
            (ChatMessage::new("m3", "alice", "FREE COINS here"), RejectReason::Blocked("free coins".into())),
        ];
        for (m, expected) in cases {
            assert_eq!(e.admit(m, &settings, 0.0), Admission::Rejected(expected));
        }

        assert!(e.admit(msg("m4", "alice"), &settings, 0.0).is_held());
        assert_eq!(
            e.admit(msg("m4", "alice"), &settings, 1.0),
            Admission::Rejected(RejectReason::Duplicate)
        );

        let hidden = Settings { show_text: false, ..Settings::default() };
        assert_eq!(
            e.admit(msg("m5", "alice"), &hidden, 0.0),
            Admission::Rejected(RejectReason::NothingVisible)
        );

        assert_eq!(e.stats().rejected, 6);
        assert_eq!(e.index().len(), 1);
    }

    #[test]
    fn test_hidden_at_placement_is_dropped() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        e.admit(msg("m1", "alice"), &settings, 0.0);

        let hidden = Settings { show_text: false, ..Settings::default() };
        e.tick(HOLD_DELAY_MS, FRAME, &hidden, &measure);
        assert_eq!(e.active_len(), 0);
        assert!(e.index().is_empty());
    }

    #[test]
    fn test_handle_event_routes() {
        let mut e = engine();
        let settings = Settings::default();

        let outcome = e.handle_event(ChatEvent::ChatMessageArrived(msg("m1", "alice")), &settings, 0.0);
        assert!(matches!(outcome, EventOutcome::Admitted(Admission::Held { .. })));
        e.handle_event(ChatEvent::ChatMessageArrived(msg("m2", "alice")), &settings, 0.0);
        e.handle_event(ChatEvent::ChatMessageArrived(msg("m3", "bob")), &settings, 0.0);

        let outcome = e.handle_event(ChatEvent::MessageDeleted { id: "m1".into() }, &settings, 1.0);
        assert_eq!(outcome, EventOutcome::Deleted(1));
        let outcome = e.handle_event(ChatEvent::UserTimedOut { username: "ALICE".into() }, &settings, 1.0);
        assert_eq!(outcome, EventOutcome::Deleted(1));
        assert_eq!(e.handle_event(ChatEvent::ChatCleared, &settings, 1.0), EventOutcome::Cleared);
        assert!(e.index().is_empty());
    }

    #[test]
    fn test_messages_expire_off_left_edge() {
        let mut e = engine();
        let settings = Settings::default();
        e.admit(msg("m1", "alice"), &settings, 0.0);

        // 1280px at 160 px/s plus the message width: well under 15s
        run(&mut e, &settings, HOLD_DELAY_MS - FRAME_MS, 60 * 15);
        assert_eq!(e.stats().placed, 1);
        assert_eq!(e.stats().expired, 1);
        assert_eq!(e.active_len(), 0);
        assert!(e.index().is_empty());
    }

    #[test]
    fn test_sustained_load_keeps_invariants() {
        let config = OverlayConfig { max_pending: 50, ..OverlayConfig::default() };
        let mut e = DanmakuEngine::new(config, 1280.0, 360.0, &Settings::default());
        let measure = EstimateMeasure::default();
        let speeds = [0.5, 1.0, 2.5, 1.5];

        let mut now = 0.0;
        for frame in 0..(60 * 40) {
            now += FRAME_MS;
            let settings = Settings {
                speed_multiplier: speeds[(frame / 90) % speeds.len()],
                ..Settings::default()
            };
            if frame < 60 * 20 {
                let id = format!("m{}", frame);
                let text = "x".repeat(3 + frame % 40);
                e.admit(ChatMessage::new(id, format!("user{}", frame % 7), text), &settings, now);
            }
            if frame % 97 == 0 {
                e.delete_by_user(&format!("user{}", frame % 7));
            }
            e.tick(now, FRAME, &settings, &measure);
            assert_single_stage(&e);
            assert_no_overlap(&e);
            assert!(e.pending_len() <= 50);
        }

        let stats = e.stats();
        assert!(stats.placed > 0);
        assert!(stats.dropped > 0, "a 50-slot queue should shed load at 60 msgs/sec");
    }

    #[test]
    fn test_resize_reassigns_rows() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        for i in 0..6 {
            e.admit(msg(&format!("m{}", i), "alice"), &settings, 0.0);
        }
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        assert_eq!(e.active_len(), 6);
        let before: Vec<(String, f32)> = e.active_messages().map(|m| (m.message.id.clone(), m.x)).collect();

        // 100px tall: font 24, 32.8px lanes → 3 rows
        e.resize(1280.0, 100.0, &settings);
        assert_eq!(e.geometry().row_count, 3);
        assert_no_overlap(&e);
        assert_single_stage(&e);
        for m in e.active_messages() {
            assert!(m.row < 3);
            assert_eq!(e.stage_of(m.id()), Some(Stage::Active { row: m.row }));
            let x = before.iter().find(|(id, _)| id == m.id()).map(|(_, x)| *x);
            assert_eq!(x, Some(m.x));
        }

        // m3..m5 share x with the messages left in rows 0-2, so none can stay
        assert_eq!(e.active_len(), 3);
        assert_eq!(e.stats().evicted, 3);
        assert_eq!(e.stage_of("m5"), None);
        let frame = e.tick(HOLD_DELAY_MS + FRAME_MS, FRAME, &settings, &measure);
        assert_eq!(frame.removed, vec!["m3".to_string(), "m4".to_string(), "m5".to_string()]);
    }

    #[test]
    fn test_resize_moves_to_nearest_safe_row() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        e.admit(msg("m0", "alice"), &settings, 0.0);
        e.admit(msg("m1", "alice"), &settings, 0.0);
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        assert_eq!(e.stage_of("m1"), Some(Stage::Active { row: 1 }));

        // 40px tall: a single lane, and m1 sits on top of m0
        e.resize(1280.0, 40.0, &settings);
        assert_eq!(e.stage_of("m0"), Some(Stage::Active { row: 0 }));
        assert_eq!(e.stage_of("m1"), None);

        let mut e = engine();
        e.admit(msg("m0", "alice"), &settings, 0.0);
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        e.delete_by_id("m0");
        e.admit(msg("m1", "alice"), &settings, 0.0);
        e.admit(msg("m2", "alice"), &settings, 0.0);
        e.admit(msg("m3", "alice"), &settings, 0.0);
        e.tick(HOLD_DELAY_MS + FRAME_MS, FRAME, &settings, &measure);
        // row 0 is free again, so m1..m3 land in rows 0..2
        assert_eq!(e.stage_of("m3"), Some(Stage::Active { row: 2 }));
        e.delete_by_id("m1");

        // 70px tall: two lanes. Row 1 is taken by m2, row 0 is free
        e.resize(1280.0, 70.0, &settings);
        assert_eq!(e.geometry().row_count, 2);
        assert_eq!(e.stage_of("m2"), Some(Stage::Active { row: 1 }));
        assert_eq!(e.stage_of("m3"), Some(Stage::Active { row: 0 }));
        assert_eq!(e.stats().evicted, 0);
        assert_no_overlap(&e);
        run(&mut e, &settings, HOLD_DELAY_MS + FRAME_MS, 120);
    }

    #[test]
    fn test_scale_change_recomputes_lanes() {
        let mut e = engine();
        let measure = EstimateMeasure::default();
        let rows = e.geometry().row_count;

        let big = Settings { scale: 2.0, ..Settings::default() };
        e.tick(0.0, FRAME, &big, &measure);
        assert!(e.geometry().row_count < rows);
    }

    #[test]
    fn test_scale_change_never_stacks_messages() {
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        // 200px tall: font 24, 32.8px lanes → 6 rows
        let mut e = DanmakuEngine::new(OverlayConfig::default(), 1280.0, 200.0, &settings);
        assert_eq!(e.geometry().row_count, 6);
        for i in 0..6 {
            e.admit(msg(&format!("m{}", i), "alice"), &settings, 0.0);
        }
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        assert_eq!(e.active_len(), 6);

        // font 48, 61.6px lanes → 3 rows
        let big = Settings { scale: 2.0, ..Settings::default() };
        let frame = e.tick(HOLD_DELAY_MS + FRAME_MS, FRAME, &big, &measure);
        assert_eq!(e.geometry().row_count, 3);
        assert_eq!(frame.removed.len(), 3);
        assert_no_overlap(&e);
        assert_single_stage(&e);
        run(&mut e, &big, HOLD_DELAY_MS + FRAME_MS, 60);
    }

    #[test]
    fn test_bad_host_input_is_neutralized() {
        let mut e = engine();
        let settings = Settings::default();
        let measure = EstimateMeasure::default();
        e.admit(msg("m1", "alice"), &settings, 0.0);
        e.tick(HOLD_DELAY_MS, FRAME, &settings, &measure);
        let x = e.active_messages().next().map(|m| m.x);
        assert!(x.is_some());

        for dt in [f32::NAN, -1.0, f32::INFINITY] {
            let frame = e.tick(HOLD_DELAY_MS, dt, &settings, &measure);
            assert_eq!(frame.moved.len(), 1);
            assert_eq!(Some(frame.moved[0].x), x);
        }

        // Invalid scale and speed fall back to 1.0
        let geometry = *e.geometry();
        let broken = Settings {
            scale: f32::NAN,
            speed_multiplier: -2.0,
            ..Settings::default()
        };
        e.admit(msg("m2", "bob"), &broken, HOLD_DELAY_MS);
        let frame = e.tick(2.0 * HOLD_DELAY_MS, 0.0, &broken, &measure);
        assert_eq!(*e.geometry(), geometry);
        assert_eq!(frame.spawned.len(), 1);
        assert_eq!(frame.spawned[0].speed, e.config().base_speed);
    }
}
