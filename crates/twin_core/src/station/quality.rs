//! OK/NG classification of a concluded work-item.

use std::collections::BTreeMap;

use crate::{NgType, QualityCheck, NG_NONE};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Verdict {
    pub ng_type: NgType,
    pub cause: Option<String>,
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        self.ng_type == NG_NONE
    }
}

impl QualityCheck {
    /// A metric the check does not find counts as passing.
    pub fn passes(&self, metrics: &BTreeMap<String, f64>) -> bool {
        let Some(&value) = metrics.get(&self.metric) else {
            return true;
        };
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// The first failing check, in profile order, decides the NG type.
pub(crate) fn classify(checks: &[QualityCheck], metrics: &BTreeMap<String, f64>) -> Verdict {
    checks.iter().find(|c| !c.passes(metrics)).map_or(
        Verdict {
            ng_type: NG_NONE,
            cause: None,
        },
        |c| Verdict {
            ng_type: c.ng_type,
            cause: Some(c.cause.clone()),
        },
    )
}
