//! Supervised loops
//!
//! Long-running listener loops run under [`supervise`]: an exit or a
//! panic is logged and the loop is relaunched after a cooldown. A
//! fault in one listener never takes down the other.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

/// Run `task` forever, restarting it after `cooldown` whenever it
/// exits, fails, or panics. The factory is invoked once per launch.
pub async fn supervise<F, Fut, E>(name: &str, cooldown: Duration, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    loop {
        let handle = tokio::spawn(task());
        match handle.await {
            Ok(Ok(())) => warn!("{} loop exited, restarting", name),
            Ok(Err(e)) => error!("{} loop failed: {}", name, e),
            Err(e) if e.is_panic() => error!("{} loop panicked", name),
            // Cancelled from outside; stop supervising.
            Err(_) => return,
        }
        sleep(cooldown).await;
    }
}
