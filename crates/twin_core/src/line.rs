//! Line orchestration: order lifecycle, cascading start, work-item handoff.
//!
//! Stations never talk to each other. They emit events into the tick's sink
//! and the orchestrator reacts to them after every station has stepped, which
//! is the single point where cross-station state changes.

use ahash::AHashMap;
use rand::Rng;

use crate::commands::{check_order_id, parse_line_command, parse_station_command};
use crate::station::RunMode;
use crate::{
    AlarmPrecedence, CommandError, Counters, EnvironmentReading, Event, EventEnvelope, LineCommand,
    LineDef, LineId, Namespace, Order, OrderId, OrderStatus, Phase, SerialPool, StationCommand,
    StationEngine, StationOrder, StepContext, TelemetryChange, WallMillis, WorkMode,
};

/// Everything one line tick produced.
#[derive(Debug, Default)]
pub struct TickOutput {
    pub events: Vec<EventEnvelope>,
    pub changes: Vec<TelemetryChange>,
}

pub struct LineOrchestrator {
    id: LineId,
    stations: Vec<StationEngine>,
    index_of: AHashMap<String, usize>,
    /// Whether each station has been started for the active order.
    started: Vec<bool>,
    order: Order,
    namespace: Namespace,
    counters: Counters,
    tick: u64,
}

impl LineOrchestrator {
    pub fn new(def: LineDef, precedence: AlarmPrecedence) -> Self {
        let stations: Vec<StationEngine> = def
            .stations
            .into_iter()
            .map(|profile| StationEngine::new(profile, precedence))
            .collect();
        let index_of = stations
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.id().0.clone(), idx))
            .collect();
        let mut namespace = Namespace::new();
        for station in &stations {
            station.publish_identity(&mut namespace);
        }
        let mut line = Self {
            id: def.id,
            started: vec![false; stations.len()],
            stations,
            index_of,
            order: Order::default(),
            namespace,
            counters: Counters::default(),
            tick: 0,
        };
        line.publish_line();
        line
    }

    pub fn id(&self) -> &LineId {
        &self.id
    }

    pub fn stations(&self) -> &[StationEngine] {
        &self.stations
    }

    pub fn station(&self, name: &str) -> Option<&StationEngine> {
        self.index_of.get(name).map(|&idx| &self.stations[idx])
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub(crate) fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.namespace
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Whether `id` names this line or one of its stations.
    pub fn owns(&self, id: &str) -> bool {
        id == self.id.0 || self.index_of.contains_key(id)
    }

    /// True while anything on the line is waiting for an external ACK.
    pub fn ack_pending(&self) -> bool {
        self.order.status == OrderStatus::WaitingAck
            || self.stations.iter().any(StationEngine::awaiting_ack)
    }

    /// Step every station once, then settle cross-station reactions.
    pub fn tick(&mut self, now_ms: WallMillis, rng: &mut impl Rng) -> TickOutput {
        let mut events = Vec::new();
        for station in &mut self.stations {
            let mut ctx = StepContext {
                now_ms,
                tick: self.tick,
                counters: &mut self.counters,
                events: &mut events,
                namespace: &mut self.namespace,
            };
            station.step(&mut ctx, rng);
        }
        self.process_events(&mut events, now_ms);
        self.publish_line();
        self.tick += 1;
        TickOutput {
            events,
            changes: self.namespace.take_changes(),
        }
    }

    /// Parse and apply a line command. Rejections are logged and leave the
    /// line untouched.
    pub fn handle_command(
        &mut self,
        raw: &str,
        now_ms: WallMillis,
    ) -> Result<Vec<EventEnvelope>, CommandError> {
        parse_line_command(raw)
            .and_then(|cmd| self.apply(cmd, now_ms))
            .inspect_err(|err| tracing::warn!(line = %self.id, command = raw, %err, "line command rejected"))
    }

    pub fn apply(
        &mut self,
        command: LineCommand,
        now_ms: WallMillis,
    ) -> Result<Vec<EventEnvelope>, CommandError> {
        let mut events = Vec::new();
        match command {
            LineCommand::Start {
                order_id,
                target_qty,
                ppm,
            } => self.start_order(order_id, target_qty, ppm, now_ms, &mut events)?,
            LineCommand::Ack => self.acknowledge(now_ms, &mut events)?,
            LineCommand::Stop => self.stop(now_ms, &mut events),
        }
        self.process_events(&mut events, now_ms);
        self.publish_line();
        Ok(events)
    }

    /// Parse and apply a station-level command addressed by station name.
    pub fn station_command(
        &mut self,
        station: &str,
        raw: &str,
        now_ms: WallMillis,
    ) -> Result<Vec<EventEnvelope>, CommandError> {
        let result = match self.index_of.get(station) {
            None => Err(CommandError::UnknownStation(station.to_string())),
            Some(&idx) => parse_station_command(raw).and_then(|cmd| {
                // A manual batch would block the cascade for the running order.
                if cmd == StationCommand::Start && self.order.active {
                    return Err(CommandError::Busy {
                        line_id: self.id.clone(),
                        order_id: self.order.order_id.clone(),
                    });
                }
                let mut events = Vec::new();
                let mut ctx = StepContext {
                    now_ms,
                    tick: self.tick,
                    counters: &mut self.counters,
                    events: &mut events,
                    namespace: &mut self.namespace,
                };
                self.stations[idx].command(cmd, &mut ctx)?;
                Ok(events)
            }),
        };
        let mut events = result.inspect_err(
            |err| tracing::warn!(line = %self.id, station, command = raw, %err, "station command rejected"),
        )?;
        self.process_events(&mut events, now_ms);
        self.publish_line();
        Ok(events)
    }

    pub fn publish_environment(&mut self, reading: EnvironmentReading) {
        let id = self.id.0.as_str();
        self.namespace.publish(id, "env_temperature", reading.temperature_c);
        self.namespace.publish(id, "env_humidity", reading.humidity_pct);
    }

    /// Changes published outside of a tick (commands, facade writes).
    pub fn take_changes(&mut self) -> Vec<TelemetryChange> {
        self.namespace.take_changes()
    }

    // -----------------------------------------------------------------------
    // Line commands
    // -----------------------------------------------------------------------

    fn start_order(
        &mut self,
        order_id: OrderId,
        target_qty: u64,
        ppm: f64,
        now_ms: WallMillis,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<(), CommandError> {
        if let Err(reason) = check_order_id(&order_id.0) {
            return Err(CommandError::Malformed {
                command: format!("START:{}:{target_qty}", order_id.0.escape_debug()),
                reason,
            });
        }
        if self.order.active || self.stations.iter().any(StationEngine::awaiting_ack) {
            return Err(CommandError::Busy {
                line_id: self.id.clone(),
                order_id: self.order.order_id.clone(),
            });
        }
        let Some(first) = self.stations.first() else {
            return Err(CommandError::Malformed {
                command: format!("START:{order_id}:{target_qty}"),
                reason: format!("line {} has no stations", self.id),
            });
        };
        let ppm = if ppm > 0.0 { ppm } else { first.profile().nominal_ppm };
        let pool = (first.profile().work_mode == WorkMode::Discrete).then(|| {
            let cycles = target_qty.div_ceil(u64::from(first.profile().units_per_cycle.max(1)));
            SerialPool::new(&order_id.0, cycles)
        });

        for station in &mut self.stations {
            let mut ctx = StepContext {
                now_ms,
                tick: self.tick,
                counters: &mut self.counters,
                events: &mut *events,
                namespace: &mut self.namespace,
            };
            station.clear_for_order(&mut ctx);
        }
        self.started.iter_mut().for_each(|s| *s = false);
        self.order = Order {
            order_id: order_id.clone(),
            target_qty,
            ppm,
            status: OrderStatus::Idle,
            active: true,
            produced_qty: 0,
        };
        events.push(crate::emit(
            &mut self.counters,
            self.tick,
            now_ms,
            Event::OrderStarted {
                line_id: self.id.clone(),
                order_id: order_id.clone(),
                target_qty,
                ppm,
            },
        ));
        tracing::info!(line = %self.id, order = %order_id, target_qty, ppm, "order started");

        let station_order = self.station_order();
        self.start_station(0, station_order, pool, now_ms, events)
    }

    fn acknowledge(&mut self, now_ms: WallMillis, events: &mut Vec<EventEnvelope>) -> Result<(), CommandError> {
        if !self.ack_pending() {
            return Err(CommandError::NothingPending(self.id.clone()));
        }
        for station in &mut self.stations {
            let mut ctx = StepContext {
                now_ms,
                tick: self.tick,
                counters: &mut self.counters,
                events: &mut *events,
                namespace: &mut self.namespace,
            };
            // A station still verifying latches the ACK.
            if station.awaiting_ack() || station.phase() == Phase::Completing {
                station.acknowledge(&mut ctx);
            }
        }
        self.order.active = false;
        self.set_status(OrderStatus::Acked, now_ms, events);
        tracing::info!(line = %self.id, order = %self.order.order_id, produced = self.order.produced_qty, "order acknowledged");
        Ok(())
    }

    fn stop(&mut self, now_ms: WallMillis, events: &mut Vec<EventEnvelope>) {
        for station in &mut self.stations {
            let mut ctx = StepContext {
                now_ms,
                tick: self.tick,
                counters: &mut self.counters,
                events: &mut *events,
                namespace: &mut self.namespace,
            };
            station.stop(&mut ctx);
        }
        self.order.active = false;
        self.set_status(OrderStatus::Stopping, now_ms, events);
        tracing::info!(line = %self.id, order = %self.order.order_id, "line stopped");
    }

    // -----------------------------------------------------------------------
    // Event reactions
    // -----------------------------------------------------------------------

    /// React to station events in order. Reactions may append further events,
    /// which are processed in the same pass.
    fn process_events(&mut self, events: &mut Vec<EventEnvelope>, now_ms: WallMillis) {
        let mut idx = 0;
        while idx < events.len() {
            let event = events[idx].event.clone();
            self.react(&event, now_ms, events);
            idx += 1;
        }
        self.settle_idle(now_ms, events);
    }

    fn react(&mut self, event: &Event, now_ms: WallMillis, events: &mut Vec<EventEnvelope>) {
        match event {
            Event::WorkItemReleased { station_id, serial } => {
                let Some(&idx) = self.index_of.get(&station_id.0) else {
                    return;
                };
                if let Some(next) = self.stations.get_mut(idx + 1) {
                    next.enqueue(serial.clone());
                }
            }
            Event::Produced {
                station_id,
                produced,
                ..
            } => {
                let Some(&idx) = self.index_of.get(&station_id.0) else {
                    return;
                };
                self.on_produced(idx, *produced, now_ms, events);
            }
            Event::AckPendingChanged {
                station_id,
                pending: true,
            } => {
                let Some(&idx) = self.index_of.get(&station_id.0) else {
                    return;
                };
                if idx + 1 < self.stations.len() {
                    let mut ctx = StepContext {
                        now_ms,
                        tick: self.tick,
                        counters: &mut self.counters,
                        events: &mut *events,
                        namespace: &mut self.namespace,
                    };
                    self.stations[idx].acknowledge(&mut ctx);
                }
            }
            Event::PhaseChanged {
                station_id,
                to: Phase::Execute,
                ..
            } => {
                let is_first = self.index_of.get(&station_id.0) == Some(&0);
                if is_first && self.order.active && self.order.status == OrderStatus::Idle {
                    self.set_status(OrderStatus::Running, now_ms, events);
                }
            }
            _ => {}
        }
    }

    fn on_produced(&mut self, idx: usize, produced: u64, now_ms: WallMillis, events: &mut Vec<EventEnvelope>) {
        if !self.order.active {
            return;
        }
        let next = idx + 1;
        if next < self.stations.len() {
            if produced >= 1 && !self.started[next] {
                let order = self.station_order();
                // Only a station still STOPPING or RESETTING refuses; the next
                // Produced event retries once it is back at IDLE.
                if self.start_station(next, order, None, now_ms, events).is_err() {
                    tracing::warn!(line = %self.id, order = %self.order.order_id, station = %self.stations[next].id(), "cascade start deferred");
                }
            }
            return;
        }
        self.order.produced_qty = produced;
        if produced >= self.order.target_qty && self.order.status == OrderStatus::Running {
            self.set_status(OrderStatus::WaitingAck, now_ms, events);
            tracing::info!(line = %self.id, order = %self.order.order_id, produced, "order waiting for acknowledgment");
        }
    }

    /// Once nothing is active and every station is parked at IDLE, the order
    /// record returns to IDLE.
    fn settle_idle(&mut self, now_ms: WallMillis, events: &mut Vec<EventEnvelope>) {
        if self.order.active || self.order.status == OrderStatus::Idle {
            return;
        }
        if self.stations.iter().all(|s| s.phase() == Phase::Idle) {
            self.set_status(OrderStatus::Idle, now_ms, events);
        }
    }

    fn start_station(
        &mut self,
        idx: usize,
        order: StationOrder,
        pool: Option<SerialPool>,
        now_ms: WallMillis,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<(), CommandError> {
        let mut ctx = StepContext {
            now_ms,
            tick: self.tick,
            counters: &mut self.counters,
            events: &mut *events,
            namespace: &mut self.namespace,
        };
        self.stations[idx].start(order, pool, RunMode::Auto, &mut ctx)?;
        self.started[idx] = true;
        Ok(())
    }

    fn station_order(&self) -> StationOrder {
        StationOrder {
            order_id: self.order.order_id.clone(),
            target_qty: self.order.target_qty,
            ppm: self.order.ppm,
        }
    }

    fn set_status(&mut self, status: OrderStatus, now_ms: WallMillis, events: &mut Vec<EventEnvelope>) {
        if self.order.status == status {
            return;
        }
        self.order.status = status;
        events.push(crate::emit(
            &mut self.counters,
            self.tick,
            now_ms,
            Event::OrderStatusChanged {
                line_id: self.id.clone(),
                order_id: self.order.order_id.clone(),
                status,
            },
        ));
    }

    fn publish_line(&mut self) {
        let ack_pending = self.ack_pending();
        let id = self.id.0.as_str();
        let ns = &mut self.namespace;
        ns.publish(id, "order_no", self.order.order_id.0.as_str());
        ns.publish(id, "order_target_qty", self.order.target_qty);
        ns.publish(id, "order_produced_qty", self.order.produced_qty);
        ns.publish(id, "order_status", self.order.status.as_str());
        ns.publish(id, "order_ppm", self.order.ppm);
        ns.publish(id, "ack_pending", ack_pending);
    }
}
