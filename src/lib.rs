//! Danmaku overlay - collision-free scrolling chat
//!
//! The `core` module is platform-independent: event intake, the hold and
//! pending queues, rate control, lane placement and motion. Hosts feed it
//! chat events and call `tick` once per rendered frame.
//!
//! - `cli`: a tokio WebSocket source client for the `danmaku-cli` harness
//! - `wasm`: a `#[wasm_bindgen]` handle for browser overlays

pub mod core;
pub mod stats;
pub mod time;

#[cfg(feature = "cli")]
pub mod source_native;
#[cfg(feature = "cli")]
pub mod source_state;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
mod wasm;
