//! Chat source connection state, shared between the client thread and the frame loop

/// Connection state of the chat event source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceState {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}

impl SourceState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SourceState::Connected)
    }
}
