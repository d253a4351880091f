//! Restart-on-failure supervisor for long-running background loops.
//!
//! ```text
//!   supervise ──spawn──▶ attempt 1 ──panic──▶ log, sleep ──spawn──▶ attempt 2 ...
//!       ▲                                                                │
//!       └────────────── shutdown flips to true: abort and return ◀───────┘
//! ```
//!
//! A loop that returns normally is restarted too, unless shutdown was
//! requested in the meantime.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Run `make()` as a task, relaunching it until `shutdown` is set.
///
/// Returns the number of attempts that were started.
pub async fn supervise<F, Fut>(
    name: &'static str,
    restart_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut make: F,
) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        attempt += 1;
        if attempt > 1 {
            info!(task = name, attempt, "relaunching supervised task");
        }

        let mut handle = tokio::spawn(make());

        tokio::select! {
            res = &mut handle => match res {
                Ok(()) => debug!(task = name, attempt, "supervised task returned"),
                Err(e) if e.is_panic() => {
                    warn!(task = name, attempt, "supervised task panicked");
                }
                Err(e) => {
                    error!(task = name, attempt, error = %e, "supervised task cancelled");
                    break;
                }
            },
            changed = shutdown.changed() => {
                handle.abort();
                if changed.is_err() {
                    debug!(task = name, "shutdown sender dropped");
                }
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!(task = name, attempts = attempt, "supervisor stopped");
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn restarts_after_panic_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        let runs = Arc::new(AtomicU32::new(0));

        let attempts = {
            let runs = runs.clone();
            let tx = tx.clone();
            supervise("flaky", Duration::from_millis(1), rx, move || {
                let runs = runs.clone();
                let tx = tx.clone();
                async move {
                    let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        panic!("boom {n}");
                    }
                    let _ = tx.send(true);
                }
            })
            .await
        };

        assert_eq!(attempts, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_aborts_running_task() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(
            "sleeper",
            Duration::from_millis(1),
            rx,
            || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            },
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let attempts = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn already_shut_down_starts_nothing() {
        let (_tx, rx) = watch::channel(true);
        let attempts = supervise("idle", Duration::from_millis(1), rx, || async {}).await;
        assert_eq!(attempts, 0);
    }
}
