//! Headless harness for the danmaku overlay core
//!
//! Connects to a chat source, runs the frame loop with estimated text metrics
//! and logs what would be drawn.
//!
//! Run with: cargo run --features cli --bin danmaku-cli

use std::sync::mpsc::TryRecvError;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use danmaku_overlay::core::{parse_batch, ConfigFile, DanmakuEngine, EstimateMeasure};
use danmaku_overlay::source_native::{Backoff, EventSourceClient};
use danmaku_overlay::stats::FrameStats;
use danmaku_overlay::time::now_ms;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8090/chat";
const DEFAULT_VIEWPORT: (f32, f32) = (1920.0, 1080.0);
const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,danmaku_overlay=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let url = std::env::var("DANMAKU_WS").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let ConfigFile { overlay, settings } = match std::env::var("DANMAKU_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => ConfigFile::default(),
    };
    let (width, height) = match std::env::var("DANMAKU_VIEWPORT") {
        Ok(raw) => parse_viewport(&raw).context("invalid DANMAKU_VIEWPORT")?,
        Err(_) => DEFAULT_VIEWPORT,
    };
    let subscribe = std::env::var("DANMAKU_SUBSCRIBE").ok();

    let mut engine = DanmakuEngine::new(overlay, width, height, &settings);
    info!(
        width,
        height,
        rows = engine.geometry().row_count,
        font_size = engine.geometry().font_size,
        "Overlay ready"
    );

    let client = EventSourceClient::connect(&url, subscribe, Backoff::default());
    let measure = EstimateMeasure::default();
    let mut frames = FrameStats::default();
    let mut events_last_interval = 0u64;
    let mut last_stats = Instant::now();

    loop {
        let frame_start = Instant::now();
        let now = now_ms();

        let mut source_closed = false;
        loop {
            match client.rx.try_recv() {
                Ok(text) => {
                    for event in parse_batch(&text) {
                        engine.handle_event(event, &settings, now);
                        events_last_interval += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    source_closed = true;
                    break;
                }
            }
        }

        frames.tick(now);
        let update = engine.tick(now, frames.last_delta_secs(), &settings, &measure);
        for spawn in &update.spawned {
            debug!(id = %spawn.id, user = %spawn.username, row = spawn.row, y = spawn.y, speed = spawn.speed, "spawn");
        }
        if !update.removed.is_empty() {
            debug!(count = update.removed.len(), "removed");
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = engine.stats();
            let decision = engine.last_decision();
            info!(
                connected = client.state().is_connected(),
                hold = engine.hold_len(),
                pending = engine.pending_len(),
                active = engine.active_len(),
                placed = stats.placed,
                dropped = stats.dropped,
                rejected = stats.rejected,
                rate = decision.multiplier,
                fps = format!("{:.1}", frames.fps()),
                "/sec" = format!("{:.1}", events_last_interval as f64 / STATS_INTERVAL.as_secs_f64()),
                "stats"
            );
            events_last_interval = 0;
            last_stats = Instant::now();
        }

        if source_closed {
            warn!(state = ?client.state(), "Chat source finished");
            break;
        }

        if let Some(rest) = FRAME_INTERVAL.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let stats = engine.stats();
    info!(
        admitted = stats.admitted,
        placed = stats.placed,
        expired = stats.expired,
        deleted = stats.deleted,
        frames = stats.frames,
        "Shutting down"
    );
    Ok(())
}

fn load_config(path: &str) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    let config = serde_json::from_str(&raw).with_context(|| format!("parsing config {path}"))?;
    info!(path, "Loaded config");
    Ok(config)
}

/// Parse `WxH`, e.g. `1920x1080`
fn parse_viewport(raw: &str) -> Result<(f32, f32)> {
    let Some((w, h)) = raw.trim().split_once(['x', 'X']) else {
        bail!("expected WIDTHxHEIGHT, got {raw:?}");
    };
    let width: f32 = w.trim().parse().with_context(|| format!("width {w:?}"))?;
    let height: f32 = h.trim().parse().with_context(|| format!("height {h:?}"))?;
    if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
        bail!("viewport must be positive, got {raw:?}");
    }
    Ok((width, height))
}
