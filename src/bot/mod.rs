//! Long-polling update loop.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::network::telegram::TelegramBot;
use handlers::Handlers;

const RETRY_DELAY: Duration = Duration::from_secs(3);

pub struct UpdateLoop {
    api: Arc<TelegramBot>,
    handlers: Arc<Handlers>,
    poll_timeout: u64,
}

impl UpdateLoop {
    pub fn new(api: Arc<TelegramBot>, handlers: Arc<Handlers>, poll_timeout: u64) -> Self {
        Self {
            api,
            handlers,
            poll_timeout,
        }
    }

    /// Poll until `shutdown` fires, then wait for in-flight handlers to wind down.
    ///
    /// Every update runs on its own task, so a slow transfer never holds up
    /// polling and a panicking handler only loses its own update.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut offset = 0i64;
        let mut tasks = JoinSet::new();

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.api.get_updates(offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let handlers = self.handlers.clone();
                        tasks.spawn(async move { handlers.handle_update(update).await });
                    }
                }
                Err(err) => {
                    warn!(target: "bot", error = %err, "polling failed, retrying in {}s", RETRY_DELAY.as_secs());
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }

            while let Some(done) = tasks.try_join_next() {
                log_join(done);
            }
        }

        if !tasks.is_empty() {
            info!(target: "bot", pending = tasks.len(), "waiting for running handlers");
        }
        while let Some(done) = tasks.join_next().await {
            log_join(done);
        }
    }
}

fn log_join(done: Result<(), tokio::task::JoinError>) {
    if let Err(err) = done {
        error!(target: "bot", error = %err, "update handler panicked");
    }
}
