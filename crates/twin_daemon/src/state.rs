use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use twin_control::MesDriver;
use twin_core::{EventEnvelope, LineId, LineOrchestrator, TelemetryChange, WallMillis};

/// One line and the rng only its ticks draw from. Every mutation of the
/// line, from the tick loop, the probe or a command, goes through this lock.
pub struct LineRuntime {
    pub line: LineOrchestrator,
    pub rng: ChaCha8Rng,
}

impl LineRuntime {
    /// Pushed telemetry changes accumulated since the last drain.
    pub fn drain(&mut self, events: Vec<EventEnvelope>) -> StreamMessage {
        StreamMessage {
            line_id: self.line.id().clone(),
            tick: self.line.current_tick(),
            events,
            changes: self.line.take_changes(),
        }
    }
}

pub type SharedLine = Arc<Mutex<LineRuntime>>;

/// What SSE subscribers receive for one line after each mutation.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMessage {
    pub line_id: LineId,
    pub tick: u64,
    pub events: Vec<EventEnvelope>,
    pub changes: Vec<TelemetryChange>,
}

impl StreamMessage {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.changes.is_empty()
    }
}

pub type StreamTx = broadcast::Sender<StreamMessage>;

pub struct MesState {
    pub driver: MesDriver,
    pub next_command_id: u64,
}

/// Monotonic wall clock shared by the tick loop and command handlers.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    start: Instant,
}

impl Default for WallClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl WallClock {
    pub fn now_ms(&self) -> WallMillis {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub lines: Arc<Vec<SharedLine>>,
    pub stream_tx: StreamTx,
    pub clock: WallClock,
    pub content_version: String,
    pub seed: u64,
    pub tick_interval_ms: u64,
    pub mes: Option<Arc<Mutex<MesState>>>,
}

impl AppState {
    /// The line that owns `id`, which may be the line id or a station name.
    pub fn line_owning(&self, id: &str) -> Option<&SharedLine> {
        self.lines.iter().find(|shared| shared.lock().line.owns(id))
    }

    /// Broadcast unless nothing changed. No subscribers is not an error.
    pub fn publish(&self, message: StreamMessage) {
        if !message.is_empty() {
            let _ = self.stream_tx.send(message);
        }
    }
}
