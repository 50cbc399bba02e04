//! Platform-agnostic overlay core - shared between the wasm binding and CLI

pub mod active;
pub mod config;
pub mod engine;
pub mod index;
pub mod measure;
pub mod message;
pub mod parser;
pub mod placement;
pub mod queues;
pub mod rate;

pub use active::{ActiveMessage, FrameUpdate, Position, Reflow, SpawnView};
pub use config::{ConfigFile, OverlayConfig, RateStep, Settings};
pub use engine::{Admission, DanmakuEngine, EngineStats, EventOutcome, RejectReason};
pub use index::Stage;
pub use measure::{EstimateMeasure, Measure, Size};
pub use message::{ChatEvent, ChatMessage, Emote, Segment};
pub use parser::{parse_batch, parse_event};
