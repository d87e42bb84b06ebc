//! Recurring idle sweep
//!
//! Runs `ConnectionService::sweep_idle` immediately and then once per period
//! until stopped. The task holds only a weak reference, so it cannot keep a
//! dropped service alive.

use log::{debug, info, warn};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::server::service::ConnectionService;

pub struct IdleSweeper {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl IdleSweeper {
    pub fn spawn(service: Weak<ConnectionService>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!("Idle sweep started, running every {}s", period.as_secs());
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(service) = service.upgrade() else {
                            debug!("Connection service dropped, idle sweep exiting");
                            return;
                        };
                        let removed = service.sweep_idle().await;
                        if removed > 0 {
                            info!("Idle sweep removed {} session(s)", removed);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Idle sweep shutting down");
                        return;
                    }
                }
            }
        });

        Self { shutdown, task }
    }

    /// Stops the timer and waits for an in-progress sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Idle sweep task ended abnormally: {}", e);
        }
    }
}
