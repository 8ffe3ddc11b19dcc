//! Headless tagfleet-sync runner: keeps the engine in sync with the game server and logs
//! liveness summaries, countdown edges and victory announcements.

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagfleet_sync::{
    Engine, EngineConfig,
    dto::format_unix_seconds,
    services::{
        ticker::Tick,
        timer::{ExpiryDetector, TimerEdge},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = EngineConfig::load();
    info!(server_url = %config.server_url, "starting tagfleet-sync");

    let engine = Engine::new(config).context("building engine")?;
    let mut ticks = engine.ticks();
    let mut connection = engine.subscribe_connection();
    let mut victories = engine.victories();
    let mut expiry = engine.expiry_detector();

    engine.start().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            changed = ticks.changed() => {
                if changed.is_err() {
                    break;
                }
                let tick = *ticks.borrow_and_update();
                report_tick(&engine, tick, &mut expiry);
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                info!(state = ?state, "push channel state");
            }
            event = victories.recv() => match event {
                Ok(event) => info!(winner = %event.winner, message = %event.message, "victory"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "victory subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn report_tick(engine: &Engine, tick: Tick, expiry: &mut ExpiryDetector) {
    let view = engine.view();
    let tiers = engine.partition(&view);
    let timer = engine.timer();

    debug!(
        seq = tick.seq,
        server_time = %format_unix_seconds(tick.now_secs),
        revision = view.revision,
        online = tiers.online.len(),
        late = tiers.late.len(),
        offline = tiers.offline.len(),
        remaining_ms = timer.remaining_ms,
        paused = timer.is_paused,
        "tick"
    );

    match expiry.observe(&view.game, tick.corrected_now_ms) {
        Some(TimerEdge::Expired) => info!("countdown expired"),
        Some(TimerEdge::Stopped) => info!("countdown stopped"),
        None => {}
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tagfleet_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
