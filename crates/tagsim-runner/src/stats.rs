//! Run summary.

use serde::Serialize;
use std::collections::BTreeMap;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No events were left.
    QueueEmpty,
    /// The next event lay beyond the time limit.
    TimeLimit,
    /// The event limit was reached.
    EventLimit,
    /// A fatal error aborted the run.
    Error,
}

/// Voltages seen by one tag's receptions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoltageSummary {
    /// Receptions delivered.
    pub receptions: u64,
    /// Lowest detected voltage.
    pub min_voltage: f64,
    /// Highest detected voltage.
    pub max_voltage: f64,
    /// `max_voltage - min_voltage`.
    pub modulation_depth: f64,
}

impl VoltageSummary {
    /// Fold in one reception.
    pub fn observe(&mut self, voltage: f64) {
        if self.receptions == 0 {
            self.min_voltage = voltage;
            self.max_voltage = voltage;
        } else {
            self.min_voltage = self.min_voltage.min(voltage);
            self.max_voltage = self.max_voltage.max(voltage);
        }
        self.receptions += 1;
        self.modulation_depth = self.max_voltage - self.min_voltage;
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationStats {
    /// Events popped and dispatched.
    pub events_dispatched: u64,
    /// Transmissions.
    pub signals_sent: u64,
    /// Receptions handed to input machines.
    pub arrivals_delivered: u64,
    /// Arrival events consumed because they were superposed into an earlier reception.
    pub arrivals_merged: u64,
    /// Timers armed by programs.
    pub timers_armed: u64,
    /// Timer events dispatched.
    pub timers_fired: u64,
    /// Message events dispatched.
    pub messages: u64,
    /// State transitions.
    pub transitions: u64,
    /// Machine faults.
    pub faults: u64,
    /// Events dropped by faulted or waiting machines.
    pub ignored_events: u64,
    /// Records written to the sink.
    pub log_records: u64,
    /// Clock at the end of the run, seconds.
    pub final_time_s: f64,
    /// Why the last run stopped.
    pub stop_reason: Option<StopReason>,
    /// Per-tag reception voltages.
    pub voltages: BTreeMap<String, VoltageSummary>,
}

impl SimulationStats {
    /// Record a reception at `tag`.
    pub fn observe_voltage(&mut self, tag: &str, voltage: f64) {
        match self.voltages.get_mut(tag) {
            Some(summary) => summary.observe(voltage),
            None => {
                let mut summary = VoltageSummary::default();
                summary.observe(voltage);
                self.voltages.insert(tag.to_string(), summary);
            }
        }
    }

    /// Modulation depth observed at `tag`, if it received anything.
    pub fn modulation_depth(&self, tag: &str) -> Option<f64> {
        self.voltages.get(tag).map(|v| v.modulation_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_summary() {
        let mut stats = SimulationStats::default();
        assert_eq!(stats.modulation_depth("a"), None);
        stats.observe_voltage("a", 0.4);
        assert_eq!(stats.modulation_depth("a"), Some(0.0));
        stats.observe_voltage("a", 0.1);
        stats.observe_voltage("a", 0.7);
        let a = &stats.voltages["a"];
        assert_eq!(a.receptions, 3);
        assert_eq!(a.min_voltage, 0.1);
        assert_eq!(a.max_voltage, 0.7);
        assert!((a.modulation_depth - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_serializes_reason() {
        let stats = SimulationStats {
            stop_reason: Some(StopReason::TimeLimit),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["stop_reason"], "time_limit");
    }
}
