use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use twin_core::{LineCommand, LineId, LineOrchestrator, OrderId, OrderStatus, Phase};

/// Anything that decides which line commands to send next.
pub trait CommandSource {
    fn generate_commands(
        &mut self,
        lines: &[LineOrchestrator],
        next_command_id: &mut u64,
    ) -> Vec<CommandEnvelope>;
}

/// A line command in its wire form, addressed to one line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEnvelope {
    pub id: String,
    pub line_id: LineId,
    pub issued_tick: u64,
    pub command: String,
}

/// One production order waiting in the MES queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub line_id: LineId,
    pub order_id: OrderId,
    pub target_qty: u64,
    /// `0` runs at the line's nominal throughput.
    #[serde(default)]
    pub ppm: f64,
}

/// Scripted stand-in for the supervisory system:
/// 1. Acknowledge a pending completion once it has waited `ack_delay_ticks`.
/// 2. Otherwise start the next queued order on any line that is fully idle.
#[derive(Debug, Default)]
pub struct MesDriver {
    queues: BTreeMap<LineId, VecDeque<OrderRequest>>,
    ack_delay_ticks: u64,
    pending_since: BTreeMap<LineId, u64>,
}

fn make_cmd(line: &LineOrchestrator, next_id: &mut u64, command: &LineCommand) -> CommandEnvelope {
    let id = format!("mes_{:06}", *next_id);
    *next_id += 1;
    CommandEnvelope {
        id,
        line_id: line.id().clone(),
        issued_tick: line.current_tick(),
        command: command.to_string(),
    }
}

/// Ready for a new order: nothing active, nothing pending, every station parked in IDLE.
fn line_ready(line: &LineOrchestrator) -> bool {
    let order = line.order();
    !order.active
        && order.status == OrderStatus::Idle
        && !line.ack_pending()
        && line.stations().iter().all(|s| s.phase() == Phase::Idle)
}

impl MesDriver {
    pub fn new(orders: impl IntoIterator<Item = OrderRequest>) -> Self {
        let mut driver = Self::default();
        for order in orders {
            driver.enqueue(order);
        }
        driver
    }

    #[must_use]
    pub fn with_ack_delay(mut self, ticks: u64) -> Self {
        self.ack_delay_ticks = ticks;
        self
    }

    pub fn enqueue(&mut self, order: OrderRequest) {
        self.queues
            .entry(order.line_id.clone())
            .or_default()
            .push_back(order);
    }

    /// Orders not yet started on `line_id`.
    pub fn queued(&self, line_id: &LineId) -> usize {
        self.queues.get(line_id).map_or(0, VecDeque::len)
    }

    /// True once every queued order has been started.
    pub fn is_drained(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    fn line_commands(&mut self, line: &LineOrchestrator, next_id: &mut u64) -> Option<CommandEnvelope> {
        let tick = line.current_tick();
        if line.ack_pending() {
            let since = *self.pending_since.entry(line.id().clone()).or_insert(tick);
            if tick.saturating_sub(since) < self.ack_delay_ticks {
                return None;
            }
            self.pending_since.remove(line.id());
            tracing::info!(line = %line.id(), order = %line.order().order_id, "MES acknowledging completion");
            return Some(make_cmd(line, next_id, &LineCommand::Ack));
        }
        self.pending_since.remove(line.id());

        if !line_ready(line) {
            return None;
        }
        let request = self.queues.get_mut(line.id())?.pop_front()?;
        tracing::info!(line = %line.id(), order = %request.order_id, qty = request.target_qty, "MES releasing order");
        let command = LineCommand::Start {
            order_id: request.order_id,
            target_qty: request.target_qty,
            ppm: request.ppm,
        };
        Some(make_cmd(line, next_id, &command))
    }
}

impl CommandSource for MesDriver {
    fn generate_commands(
        &mut self,
        lines: &[LineOrchestrator],
        next_command_id: &mut u64,
    ) -> Vec<CommandEnvelope> {
        lines
            .iter()
            .filter_map(|line| self.line_commands(line, next_command_id))
            .collect()
    }
}
