//! Overlay configuration
//!
//! Two layers, both deserializable from JSON with defaults for every field:
//! - OverlayConfig: pipeline policy (hold delay, capacity, budget, gaps, rate table)
//! - Settings: user-facing toggles read fresh at intake and placement

use serde::{Deserialize, Serialize};

/// Default grace period before a message may be placed (ms)
pub const HOLD_DELAY_MS: f64 = 5000.0;
/// Default pending queue capacity
pub const MAX_PENDING: usize = 600;
/// Default placement attempts per frame
pub const DRAIN_BUDGET_PER_FRAME: usize = 6;
/// Default vertical buffer between rows (px)
pub const V_GAP: f32 = 4.0;
/// Default horizontal spawn buffer (px)
pub const H_GAP: f32 = 24.0;
/// Default base scroll speed (px/sec) before multipliers
pub const BASE_SPEED: f32 = 160.0;

/// Font size as a fraction of viewport height
pub const FONT_SIZE_RATIO: f32 = 0.035;
/// Lower clamp for the base font size (px)
pub const MIN_FONT_SIZE: f32 = 24.0;
/// Upper clamp for the base font size (px)
pub const MAX_FONT_SIZE: f32 = 100.0;

/// One step of the rate table: depths at or above `min_depth` get `multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateStep {
    pub min_depth: usize,
    pub multiplier: f32,
}

/// Default step table: 0-2 → 1.0, 3-7 → 1.2, 8-14 → 1.4, 15-24 → 1.7, 25+ → 2.0
pub fn default_rate_steps() -> Vec<RateStep> {
    vec![
        RateStep { min_depth: 0, multiplier: 1.0 },
        RateStep { min_depth: 3, multiplier: 1.2 },
        RateStep { min_depth: 8, multiplier: 1.4 },
        RateStep { min_depth: 15, multiplier: 1.7 },
        RateStep { min_depth: 25, multiplier: 2.0 },
    ]
}

/// Pipeline policy. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub hold_delay_ms: f64,
    pub max_pending: usize,
    pub drain_budget: usize,
    pub v_gap: f32,
    pub h_gap: f32,
    pub base_speed: f32,
    /// Row height as a multiple of font size (before `v_gap`)
    pub line_height: f32,
    pub rate_steps: Vec<RateStep>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            hold_delay_ms: HOLD_DELAY_MS,
            max_pending: MAX_PENDING,
            drain_budget: DRAIN_BUDGET_PER_FRAME,
            v_gap: V_GAP,
            h_gap: H_GAP,
            base_speed: BASE_SPEED,
            line_height: 1.2,
            rate_steps: default_rate_steps(),
        }
    }
}

/// User settings snapshot. Changes apply to the next affected message only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// User speed factor (1.0 = normal)
    pub speed_multiplier: f32,
    /// Font scale factor (1.0 = base font size)
    pub scale: f32,
    pub show_text: bool,
    pub show_usernames: bool,
    pub show_emotes: bool,
    pub show_emojis: bool,
    /// Usernames or terms; matched case-insensitively
    pub blocklist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            scale: 1.0,
            show_text: true,
            show_usernames: true,
            show_emotes: true,
            show_emojis: true,
            blocklist: Vec::new(),
        }
    }
}

impl Settings {
    /// Returns the blocklist entry that matches, if any.
    ///
    /// An entry blocks a user whose name equals it, or any text containing it.
    pub fn blocked_by(&self, username: &str, text: &str) -> Option<&str> {
        let user = username.trim().to_lowercase();
        let text = text.to_lowercase();
        self.blocklist
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .find(|entry| {
                let entry = entry.to_lowercase();
                user == entry || text.contains(&entry)
            })
    }
}

/// Config file layout used by the CLI (`DANMAKU_CONFIG`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub overlay: OverlayConfig,
    pub settings: Settings,
}
