//! Browser bindings
//!
//! JS owns the DOM and the animation loop. It pushes source frames as they
//! arrive and calls `tick()` from `requestAnimationFrame`, applying the
//! returned `FrameUpdate` to its elements.

use js_sys::{Function, Reflect};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;

use crate::core::{
    parse_batch, ConfigFile, DanmakuEngine, EstimateMeasure, Measure, Segment, Settings, Size,
};
use crate::stats::FrameStats;
use crate::time::now_ms;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    tracing_wasm::set_as_global_default();
}

/// Measures through a JS callback `(segmentsJson, fontSize) => {width, height}`
struct JsMeasure {
    callback: Function,
    fallback: EstimateMeasure,
}

impl Measure for JsMeasure {
    fn measure(&self, segments: &[Segment], font_size: f32) -> Size {
        let json = match serde_json::to_string(segments) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize segments");
                return self.fallback.measure(segments, font_size);
            }
        };
        let result = self.callback.call2(
            &JsValue::NULL,
            &JsValue::from_str(&json),
            &JsValue::from_f64(font_size as f64),
        );
        let size = result.ok().and_then(|v| {
            let width = Reflect::get(&v, &JsValue::from_str("width")).ok()?.as_f64()?;
            let height = Reflect::get(&v, &JsValue::from_str("height")).ok()?.as_f64()?;
            Some(Size { width: width as f32, height: height as f32 })
        });
        match size {
            Some(size) => size,
            None => {
                warn!("Measure callback failed, using estimate");
                self.fallback.measure(segments, font_size)
            }
        }
    }
}

/// Overlay handle exported to JS
#[wasm_bindgen]
pub struct DanmakuOverlay {
    engine: DanmakuEngine,
    settings: Settings,
    measure: Option<JsMeasure>,
    frames: FrameStats,
}

#[wasm_bindgen]
impl DanmakuOverlay {
    /// `config_json` is an optional `{"overlay": {...}, "settings": {...}}` document
    #[wasm_bindgen(constructor)]
    pub fn new(width: f32, height: f32, config_json: Option<String>) -> Result<DanmakuOverlay, JsValue> {
        let ConfigFile { overlay, settings } = match config_json {
            Some(json) => serde_json::from_str(&json).map_err(|e| JsValue::from_str(&e.to_string()))?,
            None => ConfigFile::default(),
        };
        let engine = DanmakuEngine::new(overlay, width, height, &settings);
        debug!(width, height, rows = engine.geometry().row_count, "Overlay created");
        Ok(Self {
            engine,
            settings,
            measure: None,
            frames: FrameStats::default(),
        })
    }

    pub fn set_measure(&mut self, callback: Function) {
        self.measure = Some(JsMeasure {
            callback,
            fallback: EstimateMeasure::default(),
        });
    }

    /// Replace the user settings; takes effect at the next frame
    pub fn set_settings(&mut self, json: &str) -> Result<(), JsValue> {
        self.settings = serde_json::from_str(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(())
    }

    /// Feed one source frame (a single event or an array). Returns the number of events handled.
    pub fn push_event(&mut self, json: &str) -> usize {
        let now = now_ms();
        let events = parse_batch(json);
        let count = events.len();
        for event in events {
            self.engine.handle_event(event, &self.settings, now);
        }
        count
    }

    /// Advance one frame. Returns the `FrameUpdate` as JSON.
    pub fn tick(&mut self) -> String {
        let now = now_ms();
        self.frames.tick(now);
        let dt = self.frames.last_delta_secs();
        let update = match &self.measure {
            Some(measure) => self.engine.tick(now, dt, &self.settings, measure),
            None => self.engine.tick(now, dt, &self.settings, &EstimateMeasure::default()),
        };
        serde_json::to_string(&update).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize frame update");
            String::from("{\"spawned\":[],\"moved\":[],\"removed\":[]}")
        })
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.engine.resize(width, height, &self.settings);
    }

    pub fn delete_message(&mut self, id: &str) -> bool {
        self.engine.delete_by_id(id)
    }

    pub fn timeout_user(&mut self, username: &str) -> usize {
        self.engine.delete_by_user(username)
    }

    pub fn clear(&mut self) {
        self.engine.clear_all();
    }

    pub fn stats(&self) -> String {
        serde_json::to_string(&self.engine.stats()).unwrap_or_default()
    }

    pub fn fps(&self) -> f64 {
        self.frames.fps()
    }
}
