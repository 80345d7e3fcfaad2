//! Probabilistic alarm injection.
//!
//! Every scenario evolves independently once per tick: an inactive scenario
//! rolls its per-tick probability, an active one clears when its wall-clock
//! duration has elapsed. At most one instance per scenario is active.

use rand::Rng;
use serde::Serialize;

use crate::{AlarmDefinition, AlarmPrecedence, AlarmScenario, WallMillis};

#[derive(Debug, Clone, Serialize)]
pub struct AlarmInstance {
    pub activated_ms: WallMillis,
    pub duration_ms: u64,
    /// Activation order across the scheduler, used for "latest" precedence.
    pub sequence: u64,
}

impl AlarmInstance {
    fn expired(&self, now_ms: WallMillis) -> bool {
        now_ms.saturating_sub(self.activated_ms) >= self.duration_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmTransition {
    Raised { scenario: usize, duration_ms: u64 },
    Cleared { scenario: usize },
}

#[derive(Debug, Clone)]
pub struct AlarmScheduler {
    scenarios: Vec<AlarmScenario>,
    active: Vec<Option<AlarmInstance>>,
    precedence: AlarmPrecedence,
    next_sequence: u64,
}

impl AlarmScheduler {
    pub fn new(scenarios: Vec<AlarmScenario>, precedence: AlarmPrecedence) -> Self {
        let active = vec![None; scenarios.len()];
        Self {
            scenarios,
            active,
            precedence,
            next_sequence: 0,
        }
    }

    pub fn scenarios(&self) -> &[AlarmScenario] {
        &self.scenarios
    }

    pub fn instance(&self, scenario: usize) -> Option<&AlarmInstance> {
        self.active.get(scenario).and_then(Option::as_ref)
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| a.is_some()).count()
    }

    pub fn set_precedence(&mut self, precedence: AlarmPrecedence) {
        self.precedence = precedence;
    }

    /// Advance every scenario by one tick.
    ///
    /// Expiry is checked before the trial, and a scenario that expired this
    /// tick does not roll again until the next one.
    pub fn evaluate(&mut self, now_ms: WallMillis, rng: &mut impl Rng) -> Vec<AlarmTransition> {
        let mut transitions = Vec::new();
        for (idx, scenario) in self.scenarios.iter().enumerate() {
            match self.active[idx].as_ref().map(|i| i.expired(now_ms)) {
                Some(true) => {
                    self.active[idx] = None;
                    transitions.push(AlarmTransition::Cleared { scenario: idx });
                }
                Some(false) => {}
                None => {
                    if !rng.gen_bool(scenario.probability.clamp(0.0, 1.0)) {
                        continue;
                    }
                    let (min, max) = scenario.duration_ms;
                    let duration_ms = if max > min { rng.gen_range(min..max) } else { min };
                    self.active[idx] = Some(AlarmInstance {
                        activated_ms: now_ms,
                        duration_ms,
                        sequence: self.next_sequence,
                    });
                    self.next_sequence += 1;
                    transitions.push(AlarmTransition::Raised {
                        scenario: idx,
                        duration_ms,
                    });
                }
            }
        }
        transitions
    }

    /// The alarm a station shows while one or more scenarios are active.
    pub fn displayed(&self) -> Option<&AlarmDefinition> {
        let candidates = self
            .scenarios
            .iter()
            .zip(&self.active)
            .filter_map(|(s, a)| a.as_ref().map(|a| (&s.definition, a.sequence)));
        let chosen = match self.precedence {
            AlarmPrecedence::HighestSeverityThenLatest => {
                candidates.max_by_key(|(def, seq)| (def.severity, *seq))
            }
            AlarmPrecedence::LatestActivated => candidates.max_by_key(|(_, seq)| *seq),
        };
        chosen.map(|(def, _)| def)
    }
}
