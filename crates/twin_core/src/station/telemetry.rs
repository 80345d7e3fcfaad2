//! Station telemetry under `<station>.<field>` plus the KPIs behind it.

use super::StationEngine;
use crate::sampler::round3;
use crate::{Namespace, Phase};

impl StationEngine {
    /// Fraction of EXECUTE wall time spent holding a work-item.
    pub fn availability(&self) -> f64 {
        let total = self.state.uptime_ms + self.state.downtime_ms;
        if total == 0 {
            return 0.0;
        }
        self.state.uptime_ms as f64 / total as f64
    }

    /// Ideal cycle time over actual running time, capped at 1.
    pub fn performance(&self) -> f64 {
        if self.state.running_sim_s <= 0.0 {
            return 0.0;
        }
        let upc = f64::from(self.profile.units_per_cycle.max(1));
        let ideal_s = self.state.counters.produced as f64 / upc * self.profile.cycle_time_s();
        (ideal_s / self.state.running_sim_s).min(1.0)
    }

    pub fn quality_rate(&self) -> f64 {
        let c = &self.state.counters;
        if c.produced == 0 {
            return 0.0;
        }
        c.ok as f64 / c.produced as f64
    }

    pub fn oee(&self) -> f64 {
        self.availability() * self.performance() * self.quality_rate()
    }

    /// Effective throughput in parts per minute.
    pub fn throughput_ppm(&self) -> f64 {
        self.state
            .order
            .as_ref()
            .map(|o| o.ppm)
            .filter(|ppm| *ppm > 0.0)
            .unwrap_or(self.profile.nominal_ppm)
    }

    /// Static identity fields, published once when the line is built.
    pub fn publish_identity(&self, ns: &mut Namespace) {
        let name = self.profile.name.as_str();
        ns.publish(name, "equipment_id", self.profile.equipment_code.as_str());
        ns.publish(name, "process_id", self.profile.process_id.as_str());
        ns.publish(name, "unit_type", self.profile.unit_type.as_str());
        ns.publish(name, "line_id", self.profile.line_id.0.as_str());
        ns.publish(name, "last_maintenance", self.profile.last_maintenance.as_str());
        self.publish_markers(ns);
    }

    /// Phase-bound markers: the verification flag and the stop alarm.
    pub(super) fn publish_markers(&self, ns: &mut Namespace) {
        let name = self.profile.name.as_str();
        let verifying = if self.state.phase == Phase::Completing {
            "VERIFYING"
        } else {
            ""
        };
        ns.publish(name, "verification", verifying);
        ns.publish(name, "stop_alarm", self.state.phase == Phase::Stopping);
    }

    pub(super) fn publish(&self, ns: &mut Namespace) {
        let name = self.profile.name.as_str();
        let s = &self.state;

        ns.publish(name, "state", s.phase.as_str());
        ns.publish(name, "mode", s.mode.as_str());
        ns.publish(name, "order_no", s.order.as_ref().map_or("", |o| o.order_id.0.as_str()));
        ns.publish(name, "tray_id", s.tray_id.as_deref().unwrap_or(""));
        ns.publish(name, "throughput", round3(self.throughput_ppm()));
        ns.publish(name, "cycle_time", round3(self.profile.cycle_time_s() * self.speed_scale()));
        ns.publish(name, "uptime", round3(s.uptime_ms as f64 / 1_000.0));
        ns.publish(name, "downtime", round3(s.downtime_ms as f64 / 1_000.0));
        ns.publish(name, "availability", round3(self.availability()));
        ns.publish(name, "performance", round3(self.performance()));
        ns.publish(name, "quality_rate", round3(self.quality_rate()));
        ns.publish(name, "oee", round3(self.oee()));
        ns.publish(name, "energy_kwh", round3(s.energy.total_kwh));

        // NG classification.
        ns.publish(name, "current_serial", s.serial.as_ref().map_or("", |x| x.0.as_str()));
        ns.publish(name, "serial_ok", s.last_serial_ok);
        ns.publish(name, "ng_type", s.last_ng_type);
        ns.publish(name, "processed_count", s.counters.produced);
        ns.publish(name, "good_count", s.counters.ok);
        ns.publish(name, "ng_count", s.counters.ng);
        for check in &self.profile.quality_checks {
            let count = s.counters.ng_by_type.get(&check.ng_type).copied().unwrap_or(0);
            ns.publish(name, &format!("ng_count_{}", check.ng_type), count);
        }
        ns.publish(name, "time_in_cycle", round3(s.time_in_cycle_s));

        for (metric, value) in &s.metrics {
            ns.publish(name, metric, *value);
        }

        let (code, level) = self
            .alarms
            .displayed()
            .map_or(("", "INFO"), |d| (d.code.as_str(), d.severity.as_str()));
        ns.publish(name, "alarm_code", code);
        ns.publish(name, "alarm_level", level);
    }
}
