use crate::state::{AppState, LineRuntime, MesState, StreamMessage};
use std::time::Duration;
use tokio::sync::watch;
use twin_control::CommandSource;
use twin_core::WallMillis;

/// Issue any MES commands for this line, then advance it one tick.
/// Runs entirely under the line's lock.
pub fn step_line(runtime: &mut LineRuntime, mes: Option<&mut MesState>, now_ms: WallMillis) -> StreamMessage {
    let mut events = Vec::new();
    if let Some(mes) = mes {
        let commands = mes.driver.generate_commands(
            std::slice::from_ref(&runtime.line),
            &mut mes.next_command_id,
        );
        for cmd in commands {
            // Rejections are logged by the line itself.
            if let Ok(applied) = runtime.line.handle_command(&cmd.command, now_ms) {
                events.extend(applied);
            }
        }
    }
    let LineRuntime { line, rng } = runtime;
    let out = line.tick(now_ms, rng);
    events.extend(out.events);
    StreamMessage {
        line_id: line.id().clone(),
        tick: line.current_tick(),
        events,
        changes: out.changes,
    }
}

pub async fn run_tick_loop(app: AppState, tick_interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now_ms = app.clock.now_ms();
        for shared in app.lines.iter() {
            let message = {
                let mut runtime = shared.lock();
                let mut mes = app.mes.as_ref().map(|m| m.lock());
                step_line(&mut runtime, mes.as_deref_mut(), now_ms)
            };
            app.publish(message);
        }
    }
    tracing::info!("tick loop stopped");
}
