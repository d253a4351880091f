//! Store watchers that keep registry tables in sync with the
//! coordination store.
//!
//! A [`Watcher`] owns one prefix subscription. [`run_watch`] drives it
//! under [`supervise`]: each attempt opens a fresh subscription and pumps
//! events until the stream ends, the store cancels it, or the token is
//! cancelled; the supervisor then starts the next attempt.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use confhub_coord::{Coordinator, EventKind, WatchEvent, WatchStream, has_all_attrs, split_key};
use confhub_core::supervise;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DiscoverResult;
use crate::registry::RegistryTable;

#[async_trait]
pub trait Watcher: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn put(&self, event: &WatchEvent, is_create: bool) -> DiscoverResult<()>;

    async fn delete(&self, event: &WatchEvent) -> DiscoverResult<()>;

    /// Cancel the current subscription and open a new one.
    async fn refresh(&self) -> DiscoverResult<()>;

    /// Take the stream opened by the last [`refresh`](Self::refresh).
    fn take_stream(&self) -> Option<WatchStream>;

    fn cancel_token(&self) -> CancellationToken;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mirrors one registry prefix into a [`RegistryTable`].
pub struct RegistryWatcher {
    table: Arc<RegistryTable>,
    coord: Coordinator,
    token: Mutex<CancellationToken>,
    stream: Mutex<Option<WatchStream>>,
}

impl RegistryWatcher {
    pub fn new(table: Arc<RegistryTable>, coord: Coordinator) -> Self {
        Self {
            table,
            coord,
            token: Mutex::new(CancellationToken::new()),
            stream: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Watcher for RegistryWatcher {
    fn name(&self) -> &'static str {
        self.table.kind().name
    }

    async fn put(&self, event: &WatchEvent, is_create: bool) -> DiscoverResult<()> {
        let kind = *self.table.kind();
        let (id, _) = split_key(kind.instance_prefix, &event.key)?;

        if is_create && self.table.load(&id).is_none() {
            // A registration lands one attribute at a time; wait for all.
            let kvs = self.coord.get_with_prefix(&kind.instance_keys(&id)).await?;
            if !has_all_attrs(&kvs, kind.instance_prefix, &id, kind.required) {
                debug!(registry = kind.name, %id, "registration incomplete");
                return Ok(());
            }
        }
        self.table.refresh(&id).await?;
        Ok(())
    }

    async fn delete(&self, event: &WatchEvent) -> DiscoverResult<()> {
        let (id, _) = split_key(self.table.kind().instance_prefix, &event.key)?;
        if self.table.delete(&id).is_some() {
            debug!(registry = self.name(), %id, "instance removed");
        }
        Ok(())
    }

    async fn refresh(&self) -> DiscoverResult<()> {
        let token = CancellationToken::new();
        let stream = self
            .coord
            .watch(self.table.kind().instance_prefix, token.clone())
            .await?;
        let previous = std::mem::replace(&mut *lock(&self.token), token);
        previous.cancel();
        *lock(&self.stream) = Some(stream);
        Ok(())
    }

    fn take_stream(&self) -> Option<WatchStream> {
        lock(&self.stream).take()
    }

    fn cancel_token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }
}

/// Drive `watcher` until `shutdown` is set. Returns the attempt count.
pub async fn run_watch<W: Watcher>(
    watcher: Arc<W>,
    restart_delay: Duration,
    shutdown: watch::Receiver<bool>,
) -> u32 {
    let attempts = supervise(watcher.name(), restart_delay, shutdown, {
        let watcher = watcher.clone();
        move || watch_once(watcher.clone())
    })
    .await;
    watcher.cancel_token().cancel();
    attempts
}

async fn watch_once<W: Watcher>(watcher: Arc<W>) {
    if let Err(e) = watcher.refresh().await {
        warn!(watcher = watcher.name(), error = %e, "failed to subscribe");
        return;
    }
    let Some(mut stream) = watcher.take_stream() else {
        return;
    };
    let token = watcher.cancel_token();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(watcher = watcher.name(), "subscription cancelled");
                return;
            }
            resp = stream.recv() => {
                let Some(resp) = resp else {
                    warn!(watcher = watcher.name(), "watch stream closed");
                    return;
                };
                if resp.canceled {
                    warn!(watcher = watcher.name(), "watch cancelled by store");
                    return;
                }
                for event in &resp.events {
                    let applied = match event.kind {
                        EventKind::Put => watcher.put(event, event.is_create).await,
                        EventKind::Delete => watcher.delete(event).await,
                    };
                    if let Err(e) = applied {
                        warn!(watcher = watcher.name(), key = %event.key, error = %e, "event not applied");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SERVERS;
    use confhub_coord::{EmbeddedCoordStore, WatchResponse};
    use confhub_core::RunStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn test_coord() -> Coordinator {
        Coordinator::new(Arc::new(EmbeddedCoordStore::open_in_memory().unwrap()))
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn write_server(coord: &Coordinator, id: &str, attrs: &[(&str, &str)]) {
        for (attr, value) in attrs {
            coord
                .put(&SERVERS.attr_key(id, attr), value)
                .await
                .unwrap();
        }
    }

    const FULL: [(&str, &str); 4] = [
        ("host", "10.0.0.7"),
        ("port", "8600"),
        ("env", "develop"),
        ("status", "online"),
    ];

    #[tokio::test]
    async fn complete_registration_is_picked_up() {
        let coord = test_coord();
        let table = Arc::new(RegistryTable::new(SERVERS, coord.clone()));
        let watcher = Arc::new(RegistryWatcher::new(table.clone(), coord.clone()));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_watch(watcher, Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;

        write_server(&coord, "remote", &FULL[..2]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(table.load("remote").is_none());

        write_server(&coord, "remote", &FULL[2..]).await;
        assert!(eventually(|| table.load("remote").is_some()).await);
        assert_eq!(table.load("remote").unwrap().status, RunStatus::Online);

        coord.put(&SERVERS.attr_key("remote", "status"), "break").await.unwrap();
        assert!(eventually(|| {
            table.load("remote").map(|r| r.status) == Some(RunStatus::Break)
        })
        .await);

        coord.delete_with_prefix(&SERVERS.instance_keys("remote")).await.unwrap();
        assert!(eventually(|| table.load("remote").is_none()).await);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_token_cancel() {
        let coord = test_coord();
        let table = Arc::new(RegistryTable::new(SERVERS, coord.clone()));
        let watcher = Arc::new(RegistryWatcher::new(table.clone(), coord.clone()));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_watch(watcher.clone(), Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        watcher.cancel_token().cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        write_server(&coord, "late", &FULL).await;
        assert!(eventually(|| table.load("late").is_some()).await);

        tx.send(true).unwrap();
        assert!(task.await.unwrap() >= 2);
    }

    /// Panics on its first event, then behaves.
    struct FlakyWatcher {
        refreshes: AtomicU32,
        applied: AtomicU32,
        token: Mutex<CancellationToken>,
        stream: Mutex<Option<WatchStream>>,
        feed: Mutex<Option<mpsc::UnboundedSender<WatchResponse>>>,
    }

    #[async_trait]
    impl Watcher for FlakyWatcher {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn put(&self, _event: &WatchEvent, _is_create: bool) -> DiscoverResult<()> {
            if self.refreshes.load(Ordering::SeqCst) == 1 {
                panic!("first subscription blows up");
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, _event: &WatchEvent) -> DiscoverResult<()> {
            Ok(())
        }

        async fn refresh(&self) -> DiscoverResult<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            *lock(&self.feed) = Some(tx);
            *lock(&self.stream) = Some(rx);
            let previous = std::mem::replace(&mut *lock(&self.token), CancellationToken::new());
            previous.cancel();
            Ok(())
        }

        fn take_stream(&self) -> Option<WatchStream> {
            lock(&self.stream).take()
        }

        fn cancel_token(&self) -> CancellationToken {
            lock(&self.token).clone()
        }
    }

    fn put_event() -> WatchResponse {
        WatchResponse {
            events: vec![WatchEvent {
                kind: EventKind::Put,
                key: "/x/a/host".to_string(),
                value: "h".to_string(),
                is_create: true,
            }],
            canceled: false,
        }
    }

    #[tokio::test]
    async fn panicking_watcher_is_relaunched() {
        let watcher = Arc::new(FlakyWatcher {
            refreshes: AtomicU32::new(0),
            applied: AtomicU32::new(0),
            token: Mutex::new(CancellationToken::new()),
            stream: Mutex::new(None),
            feed: Mutex::new(None),
        });
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_watch(watcher.clone(), Duration::from_millis(10), rx));

        assert!(eventually(|| watcher.refreshes.load(Ordering::SeqCst) == 1).await);
        let feed = lock(&watcher.feed).clone().unwrap();
        feed.send(put_event()).unwrap();

        assert!(eventually(|| watcher.refreshes.load(Ordering::SeqCst) == 2).await);
        let feed = lock(&watcher.feed).clone().unwrap();
        feed.send(put_event()).unwrap();
        assert!(eventually(|| watcher.applied.load(Ordering::SeqCst) == 1).await);

        tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), 2);
    }
}
