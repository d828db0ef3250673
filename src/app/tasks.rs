//! Background tasks of the running application.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::script::{Event, ScriptHost};
use crate::transport::UpdateSource;

/// Wait after a failed poll before retrying.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Lower bound of the cache sweep period.
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Fire `onTimer` every `period`.
///
/// Each run is awaited before the next tick; ticks missed meanwhile are
/// skipped, so timer runs never overlap each other.
pub fn start_timer(host: Arc<ScriptHost>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Timer started (period: {:?})", period);
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first immediate tick
        timer.tick().await;

        loop {
            timer.tick().await;
            Arc::clone(&host).dispatch(Event::Timer).await;
        }
    })
}

/// Periodically drop expired cache entries.
pub fn start_cache_sweeper(cache: Arc<CacheStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(cache.ttl().max(MIN_SWEEP_PERIOD));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await;

        loop {
            timer.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired cache entries");
            }
        }
    })
}

/// Poll updates forever, dispatching each on its own task.
pub async fn poll_updates(host: Arc<ScriptHost>, updates: Arc<dyn UpdateSource>) {
    info!("Polling for updates");
    let mut offset = 0;

    loop {
        let batch = match updates.get_updates(offset).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Failed to fetch updates");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in batch {
            offset = offset.max(update.update_id + 1);
            match Event::from_update(update) {
                Some(event) => {
                    tokio::spawn(Arc::clone(&host).dispatch(event));
                }
                None => debug!("Ignoring unsupported update"),
            }
        }
    }
}
