//! Environment probe: ambient readings on a timer of their own, independent
//! of the tick cadence.

use crate::state::AppState;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::sync::watch;
use twin_core::EnvironmentSensor;

pub fn sample_once(app: &AppState, sensor: &mut EnvironmentSensor, rng: &mut ChaCha8Rng) {
    let reading = sensor.sample(rng);
    for shared in app.lines.iter() {
        let message = {
            let mut runtime = shared.lock();
            runtime.line.publish_environment(reading);
            runtime.drain(Vec::new())
        };
        app.publish(message);
    }
}

/// Runs until `shutdown` flips; the caller joins the returned task.
pub async fn run_environment_probe(
    app: AppState,
    mut sensor: EnvironmentSensor,
    mut rng: ChaCha8Rng,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => sample_once(&app, &mut sensor, &mut rng),
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!("environment probe stopped");
}
