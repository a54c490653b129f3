//! Interval loops driving flush, decay, bonus placement and spawn upkeep.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::Engine;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to the engine's background loops.
#[derive(Debug)]
pub struct Background {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Background {
    /// Signals every loop to stop and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(error) = task.await {
                warn!(%error, "background loop ended abnormally");
            }
        }
    }
}

impl Engine {
    /// Starts the flush, decay, bonus and maintenance loops on the current runtime.
    ///
    /// Flushes commit synchronously, occupying a runtime worker while the
    /// backend writes.
    pub fn spawn_background(self: &Arc<Self>) -> Background {
        let (shutdown, signal) = watch::channel(false);
        let config = self.config();

        let tasks = vec![
            spawn_loop("flush", config.flush_interval, signal.clone(), {
                let engine = Arc::clone(self);
                move || {
                    // The store already logs and retains a failed batch.
                    if let Err(error) = engine.flush() {
                        debug!(%error, "scheduled flush deferred");
                    }
                    async {}
                }
            }),
            spawn_loop("decay", config.decay_interval, signal.clone(), {
                let engine = Arc::clone(self);
                move || {
                    let engine = Arc::clone(&engine);
                    async move {
                        if let Err(error) = engine.tick_decay().await {
                            warn!(%error, "decay tick failed");
                        }
                    }
                }
            }),
            spawn_loop("bonus", config.bonus_interval, signal.clone(), {
                let engine = Arc::clone(self);
                move || {
                    let engine = Arc::clone(&engine);
                    async move {
                        if let Err(error) = engine.tick_spawn_bonus().await {
                            warn!(%error, "bonus tick failed");
                        }
                    }
                }
            }),
            spawn_loop("maintenance", config.maintenance_interval, signal, {
                let engine = Arc::clone(self);
                move || {
                    if let Err(error) = engine.maintain() {
                        warn!(%error, "spawn maintenance failed");
                    }
                    async {}
                }
            }),
        ];

        Background { shutdown, tasks }
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(period.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        let _ = interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "background loop stopped");
    })
}
