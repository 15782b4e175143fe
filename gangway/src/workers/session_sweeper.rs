//! Session sweeper worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::bridge::session::SessionStore;

/// Sweeper options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the session sweeper worker
pub async fn run<S, F>(
    options: &Options,
    sessions: &dyn SessionStore,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Session sweeper starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Session sweeper shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let removed = sessions.sweep_expired();
        if removed > 0 {
            debug!("Discarded {} idle sessions ({} remain)", removed, sessions.len());
        }
    }
}
