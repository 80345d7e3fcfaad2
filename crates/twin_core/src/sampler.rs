//! Randomized process measurements around nominal set-points.
//!
//! The sampling strategy is a plain function pointer chosen per unit type;
//! profiles can override it.

use rand::{Rng, RngCore};
use std::collections::BTreeMap;

use crate::{MetricSpec, SamplerKind, UnitType};

/// Draws one reading for a metric.
pub type MetricSampler = fn(&MetricSpec, &mut dyn RngCore) -> f64;

/// Uniform over `nominal ± spread`.
pub fn uniform(spec: &MetricSpec, rng: &mut dyn RngCore) -> f64 {
    let spread = spec.spread.abs();
    spec.nominal + rng.gen_range(-spread..=spread)
}

/// Triangular around `nominal`, same support as [`uniform`] but concentrated
/// near the set-point.
pub fn peaked(spec: &MetricSpec, rng: &mut dyn RngCore) -> f64 {
    let spread = spec.spread.abs();
    let a: f64 = rng.gen();
    let b: f64 = rng.gen();
    spec.nominal + spread * (a + b - 1.0)
}

pub fn sampler_for(unit_type: UnitType, kind: Option<SamplerKind>) -> MetricSampler {
    match kind {
        Some(SamplerKind::Uniform) => uniform,
        Some(SamplerKind::Peaked) => peaked,
        None => match unit_type {
            UnitType::Coating | UnitType::Formation | UnitType::Assembly => peaked,
            UnitType::Cleaning | UnitType::Packing | UnitType::Inspection => uniform,
        },
    }
}

/// Sample every metric once, rounded to three decimals.
pub fn sample_metrics(
    specs: &[MetricSpec],
    sampler: MetricSampler,
    rng: &mut dyn RngCore,
) -> BTreeMap<String, f64> {
    specs
        .iter()
        .map(|spec| (spec.name.clone(), round3(sampler(spec, rng))))
        .collect()
}

/// Slow parked-equipment drift: a sinusoid around the idle reading plus a
/// small random walk term.
pub(crate) fn drift(spec: &MetricSpec, angle: f64, rng: &mut dyn RngCore) -> f64 {
    let base = spec.idle.unwrap_or(spec.nominal);
    let amplitude = spec.spread.abs() * 0.2;
    let jitter = amplitude * 0.1;
    let walk = if jitter > 0.0 {
        rng.gen_range(-jitter..=jitter)
    } else {
        0.0
    };
    round3(base + amplitude * angle.sin() + walk)
}

pub(crate) fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn spec(nominal: f64, spread: f64) -> MetricSpec {
        MetricSpec {
            name: "temperature".to_string(),
            unit: "C".to_string(),
            nominal,
            spread,
            idle: Some(25.0),
        }
    }

    #[test]
    fn samplers_stay_inside_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let s = spec(60.0, 4.0);
        for _ in 0..1_000 {
            for sampler in [uniform as MetricSampler, peaked as MetricSampler] {
                let v = sampler(&s, &mut rng);
                assert!((56.0..=64.0).contains(&v), "sample {v} outside band");
            }
        }
    }

    #[test]
    fn peaked_concentrates_near_nominal() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let s = spec(0.0, 1.0);
        let n = 20_000;
        let near = |f: MetricSampler, rng: &mut ChaCha8Rng| {
            (0..n).filter(|_| f(&s, rng).abs() < 0.25).count()
        };
        let uniform_near = near(uniform, &mut rng);
        let peaked_near = near(peaked, &mut rng);
        assert!(peaked_near > uniform_near, "{peaked_near} <= {uniform_near}");
    }

    #[test]
    fn zero_spread_is_exact() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let s = spec(12.5, 0.0);
        assert!((uniform(&s, &mut rng) - 12.5).abs() < 1e-12);
        assert!((drift(&s, 0.0, &mut rng) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn sampler_override_wins_over_unit_type() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let s = spec(10.0, 1.0);
        let chosen = sampler_for(UnitType::Coating, Some(SamplerKind::Uniform));
        let mut rng2 = ChaCha8Rng::seed_from_u64(5);
        assert!((chosen(&s, &mut rng) - uniform(&s, &mut rng2)).abs() < 1e-12);
    }

    #[test]
    fn sample_metrics_covers_every_spec() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let specs = vec![spec(1.0, 0.1), MetricSpec { name: "pressure".to_string(), ..spec(2.0, 0.1) }];
        let values = sample_metrics(&specs, uniform, &mut rng);
        assert_eq!(values.len(), 2);
        assert!(values.contains_key("pressure"));
    }
}
