use std::time::Duration;

use chrono::Utc;

use crate::{notices, reservations, settings, state::AppState};

/// Background loop reclaiming stale holds and sending due notices.
///
/// Both sweeps are idempotent, so a crashed or overlapping run is harmless;
/// failures are logged and retried on the next tick.
pub fn spawn(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            run_once(&state).await;
        }
    });
}

async fn run_once(state: &AppState) {
    let now = Utc::now();

    match reservations::expire_stale_holds(&state.db, now).await {
        Ok(0) => {}
        Ok(count) => log::info!("Expired {count} stale holds"),
        Err(err) => log::warn!("Hold expiry sweep failed: {err}"),
    }

    let settings = match settings::load_settings(&state.db).await {
        Ok(settings) => settings,
        Err(err) => {
            log::warn!("Notice sweep skipped, settings unavailable: {err}");
            return;
        }
    };

    match notices::scan_and_send_notices(&state.db, &settings, state.messenger.as_ref(), now).await
    {
        Ok(0) => {}
        Ok(count) => log::info!("Sent {count} notices"),
        Err(err) => log::warn!("Notice sweep failed: {err}"),
    }
}
