//! Periodic expiry sweep

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use contracts::BackendProvisioner;
use discovery::CoordinationStore;

use crate::router::{ClusteredRouter, RouterInner};

/// Tick `router` every `interval` until shutdown or until the router is
/// dropped.
pub(crate) fn spawn_sweeper<S, P>(
    router: Weak<RouterInner<S, P>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: CoordinationStore,
    P: BackendProvisioner,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(inner) = router.upgrade() else {
                        break;
                    };
                    ClusteredRouter::from_inner(inner).tick().await;
                }
            }
        }
        debug!("Expiry sweep stopped");
    })
}
