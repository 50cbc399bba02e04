//! Native chat source client
//!
//! A background thread owns a single-threaded tokio runtime and keeps a
//! WebSocket session to the chat source alive, reconnecting with backoff.
//! Raw text frames go to the frame loop over a channel; parsing happens there.

use crate::source_state::SourceState;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Reconnect policy for the source session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Give up after this many consecutive failed attempts (None = never)
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), doubling up to `max`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// How one session ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    /// The frame loop dropped its receiver
    ReceiverGone,
    /// Connected, then lost the stream
    Dropped,
    /// Never got connected
    Failed(String),
}

/// Chat source client that runs in a background thread
pub struct EventSourceClient {
    /// Raw text frames, parsed by the frame loop
    pub rx: Receiver<String>,
    pub state: Arc<Mutex<SourceState>>,
}

impl EventSourceClient {
    /// Connect to a chat source endpoint.
    ///
    /// `subscribe` is sent after every handshake when the source expects it.
    pub fn connect(url: &str, subscribe: Option<String>, backoff: Backoff) -> Self {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(Mutex::new(SourceState::Connecting));

        let session = Session {
            url: url.to_string(),
            subscribe,
            tx,
            state: state.clone(),
        };
        std::thread::spawn(move || {
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt.block_on(session.run_forever(backoff)),
                Err(e) => {
                    error!(error = %e, "Failed to create tokio runtime");
                    session.set_state(SourceState::Error(e.to_string()));
                }
            }
        });

        Self { rx, state }
    }

    pub fn state(&self) -> SourceState {
        self.state.lock().clone()
    }
}

struct Session {
    url: String,
    subscribe: Option<String>,
    tx: Sender<String>,
    state: Arc<Mutex<SourceState>>,
}

impl Session {
    fn set_state(&self, state: SourceState) {
        *self.state.lock() = state;
    }

    async fn run_forever(self, backoff: Backoff) {
        let mut failures = 0u32;
        loop {
            match self.run_once().await {
                SessionEnd::ReceiverGone => {
                    debug!("Frame loop gone, stopping source client");
                    return;
                }
                SessionEnd::Dropped => {
                    failures = 1;
                    self.set_state(SourceState::Disconnected);
                }
                SessionEnd::Failed(reason) => {
                    failures += 1;
                    self.set_state(SourceState::Error(reason));
                }
            }

            if backoff.exhausted(failures) {
                warn!(attempts = failures, "Giving up on chat source");
                return;
            }
            let delay = backoff.delay(failures);
            info!(attempt = failures, delay_ms = delay.as_millis() as u64, "Reconnecting to chat source");
            tokio::time::sleep(delay).await;
            self.set_state(SourceState::Connecting);
        }
    }

    async fn run_once(&self) -> SessionEnd {
        info!(url = %self.url, "Connecting to chat source");

        let stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(error = %e, "Failed to connect");
                return SessionEnd::Failed(e.to_string());
            }
        };
        let (mut write, mut read) = stream.split();

        if let Some(subscribe) = &self.subscribe {
            if let Err(e) = write.send(Message::Text(subscribe.clone())).await {
                error!(error = %e, "Failed to send subscribe message");
                return SessionEnd::Failed(e.to_string());
            }
        }
        info!("Chat source connected");
        self.set_state(SourceState::Connected);

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if self.tx.send(text.to_string()).is_err() {
                        return SessionEnd::ReceiverGone;
                    }
                }
                Ok(Message::Close(reason)) => {
                    warn!(?reason, "Chat source closed the connection");
                    return SessionEnd::Dropped;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Chat source error");
                    return SessionEnd::Dropped;
                }
            }
        }

        warn!("Chat source stream ended");
        SessionEnd::Dropped
    }
}
