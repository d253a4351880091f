//! The client runtime.
//!
//! ```text
//!  start ──► discover ──► pull ──► table ──► cache file
//!               │          ▲
//!               ▼          │ refresh_all
//!          watch loop ─────┘     (backoff on error)
//!
//!  background: periodic pull · periodic rediscovery · discover heartbeat
//! ```
//!
//! Reads (`get`, `get_or`, `get_all`) only touch the local table and
//! never wait on the network.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use confhub_core::config::ClientSettings;
use confhub_core::wire::{ListRequest, RegisterRequest, WatchRequest};
use confhub_core::{Backoff, RunStatus, WatchEventType, endpoint_id, supervise};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CacheFile;
use crate::error::{ClientError, ClientResult};
use crate::listen::{ListenerSet, ALL_KEYS};
use crate::table::{Change, ConfigTable};
use crate::transport::{ConfigTransport, HttpTransport};

/// Pause before a panicked watch loop is relaunched.
const WATCH_RESTART_DELAY: Duration = Duration::from_secs(1);

pub struct ConfigClient {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    settings: ClientSettings,
    transport: Arc<dyn ConfigTransport>,
    table: ConfigTable,
    listeners: ListenerSet,
    cache: CacheFile,
    client_id: String,
    server: RwLock<Option<String>>,
    /// Id the current server knows us by; 0 until the first watch.
    instance_id: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl ConfigClient {
    /// Start a client that talks HTTP to the configured discover service.
    pub async fn start(settings: ClientSettings) -> ClientResult<Self> {
        let transport = HttpTransport::new(
            &settings.discover_addr,
            settings.request_timeout(),
            settings.watch_timeout(),
        );
        Self::start_with(settings, Arc::new(transport)).await
    }

    pub async fn start_with(
        settings: ClientSettings,
        transport: Arc<dyn ConfigTransport>,
    ) -> ClientResult<Self> {
        for (field, value) in [
            ("app", &settings.app),
            ("cluster", &settings.cluster),
            ("host", &settings.host),
        ] {
            if value.trim().is_empty() {
                return Err(ClientError::Startup(format!("{field} is required")));
            }
        }
        if settings.port == 0 {
            return Err(ClientError::Startup("port is required".to_string()));
        }

        let inner = Arc::new(Inner::new(settings, transport));

        if let Err(e) = inner.refresh().await {
            if !inner.settings.use_cache {
                return Err(ClientError::Startup(format!("initial pull failed: {e}")));
            }
            let data = inner.cache.load().await.map_err(|cache_err| {
                ClientError::Startup(format!("initial pull failed: {e}; {cache_err}"))
            })?;
            inner.table.replace(&data);
            warn!(
                error = %e,
                keys = data.len(),
                cache = %inner.cache.path().display(),
                "initial pull failed, starting from cache"
            );
        }

        if let Err(e) = inner.register().await {
            warn!(client_id = %inner.client_id, error = %e, "client registration failed");
        }

        let (shutdown, rx) = watch::channel(false);
        let tasks = inner.spawn_tasks(rx);
        info!(
            client_id = %inner.client_id,
            app = %inner.settings.app,
            cluster = %inner.settings.cluster,
            env = %inner.settings.env,
            keys = inner.table.len(),
            "config client started"
        );
        Ok(Self {
            inner,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.table.get(key)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_all(&self) -> BTreeMap<String, String> {
        self.inner.table.snapshot()
    }

    /// Call `listener` for every change of `key`, or of any key when
    /// `key` is empty.
    pub fn listen<F>(&self, key: &str, listener: F)
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let key = if key.is_empty() { ALL_KEYS } else { key };
        self.inner.listeners.add(key, Arc::new(listener));
    }

    /// Pull now instead of waiting for the next notification.
    pub async fn refresh(&self) -> ClientResult<usize> {
        self.inner.refresh().await
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn instance_id(&self) -> Option<u64> {
        self.inner.instance_id()
    }

    pub async fn server(&self) -> Option<String> {
        self.inner.server.read().await.clone()
    }

    /// Stop background work and tell the server and discover we left.
    /// Failures are only logged.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "client task ended abnormally");
                }
            }
        }

        let inner = &self.inner;
        if let (Some(server), Some(id)) = (inner.server.read().await.clone(), inner.instance_id()) {
            if let Err(e) = inner.transport.exit(&server, id).await {
                warn!(%server, instance_id = id, error = %e, "exit notice failed");
            }
        }
        if let Err(e) = inner
            .transport
            .heartbeat(&inner.client_id, Some(RunStatus::Offline))
            .await
        {
            debug!(client_id = %inner.client_id, error = %e, "offline notice failed");
        }
        info!(client_id = %inner.client_id, "config client stopped");
    }
}

impl Inner {
    fn new(settings: ClientSettings, transport: Arc<dyn ConfigTransport>) -> Self {
        let port = settings.port.to_string();
        let client_id = endpoint_id(
            "client",
            &[
                &settings.app,
                &settings.cluster,
                &settings.host,
                &port,
                settings.env.as_str(),
            ],
        );
        let cache = CacheFile::new(settings.cache_dir.join(settings.cache_file_name()));
        Self {
            settings,
            transport,
            table: ConfigTable::new(),
            listeners: ListenerSet::new(),
            cache,
            client_id,
            server: RwLock::new(None),
            instance_id: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    fn instance_id(&self) -> Option<u64> {
        Some(self.instance_id.load(Ordering::Acquire)).filter(|id| *id != 0)
    }

    fn spawn_tasks(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let watch_task = {
            let inner = self.clone();
            let loop_rx = shutdown.clone();
            let rx = shutdown.clone();
            tokio::spawn(async move {
                supervise("config-watch", WATCH_RESTART_DELAY, rx, move || {
                    watch_loop(inner.clone(), loop_rx.clone())
                })
                .await;
            })
        };

        let pull_task = {
            let inner = self.clone();
            tokio::spawn(every(
                "periodic-pull",
                self.settings.pull_interval(),
                shutdown.clone(),
                move || {
                    let inner = inner.clone();
                    async move {
                        if let Err(e) = inner.refresh().await {
                            warn!(error = %e, "periodic pull failed");
                        }
                    }
                },
            ))
        };

        let rediscover_task = {
            let inner = self.clone();
            tokio::spawn(every(
                "rediscover",
                self.settings.rediscover_interval(),
                shutdown.clone(),
                move || {
                    let inner = inner.clone();
                    async move {
                        if let Err(e) = inner.rediscover().await {
                            warn!(error = %e, "server rediscovery failed");
                        }
                    }
                },
            ))
        };

        let heartbeat_task = {
            let inner = self.clone();
            tokio::spawn(every(
                "client-heartbeat",
                self.settings.heartbeat_interval(),
                shutdown,
                move || {
                    let inner = inner.clone();
                    async move { inner.heartbeat().await }
                },
            ))
        };

        vec![watch_task, pull_task, rediscover_task, heartbeat_task]
    }

    /// Pick an online server, keeping the current one while it is listed.
    async fn rediscover(&self) -> ClientResult<String> {
        let env = self.settings.env;
        let online: Vec<String> = self
            .transport
            .discover(env)
            .await?
            .into_iter()
            .filter(|s| s.env == env && s.is_online())
            .map(|s| s.address())
            .collect();
        if online.is_empty() {
            return Err(ClientError::NoServer(env));
        }

        let mut current = self.server.write().await;
        if let Some(address) = current.as_ref().filter(|a| online.contains(a)) {
            return Ok(address.clone());
        }
        let picked = online[spread(&self.client_id, online.len())].clone();
        info!(previous = ?*current, server = %picked, "config server selected");
        *current = Some(picked.clone());
        self.instance_id.store(0, Ordering::Release);
        Ok(picked)
    }

    async fn ensure_server(&self) -> ClientResult<String> {
        if let Some(address) = self.server.read().await.clone() {
            return Ok(address);
        }
        self.rediscover().await
    }

    async fn forget_server(&self) {
        if let Some(address) = self.server.write().await.take() {
            debug!(server = %address, "dropping unreachable server");
        }
        self.instance_id.store(0, Ordering::Release);
    }

    /// Pull the full config and apply it: listeners see every change,
    /// then the table and the cache file take the new snapshot.
    async fn refresh(&self) -> ClientResult<usize> {
        let _guard = self.refresh_lock.lock().await;
        let server = self.ensure_server().await?;
        let req = ListRequest {
            app: self.settings.app.clone(),
            cluster: Some(self.settings.cluster.clone()),
            instance_id: self.instance_id(),
        };
        let pulled = match self.transport.pull(&server, &req).await {
            Ok(pulled) => pulled,
            Err(e) => {
                if matches!(e, ClientError::Protocol { status: 400, .. }) {
                    self.instance_id.store(0, Ordering::Release);
                }
                return Err(e);
            }
        };

        let next = pulled.flatten();
        let changes = self.table.diff(&next);
        self.listeners.fire(&changes);
        self.table.replace(&next);
        if let Err(e) = self.cache.store(&next).await {
            warn!(error = %e, "cache write failed");
        }
        if changes.is_empty() {
            debug!(%server, keys = next.len(), "config unchanged");
        } else {
            info!(%server, keys = next.len(), changes = changes.len(), "config refreshed");
        }
        Ok(changes.len())
    }

    /// One long-poll round trip.
    async fn poll_once(&self) -> ClientResult<WatchEventType> {
        let server = self.ensure_server().await?;
        let req = WatchRequest {
            app: self.settings.app.clone(),
            cluster: self.settings.cluster.clone(),
            env: self.settings.env,
            host: self.settings.host.clone(),
            port: self.settings.port,
        };
        let reply = self.transport.watch(&server, &req).await?;
        self.instance_id.store(reply.instance_id, Ordering::Release);
        if reply.event == WatchEventType::RefreshAll {
            self.refresh().await?;
        }
        Ok(reply.event)
    }

    async fn register(&self) -> ClientResult<()> {
        self.transport
            .register(&RegisterRequest {
                id: self.client_id.clone(),
                host: self.settings.host.clone(),
                port: self.settings.port,
                cluster: self.settings.cluster.clone(),
                env: self.settings.env,
            })
            .await
    }

    async fn heartbeat(&self) {
        match self.transport.heartbeat(&self.client_id, None).await {
            Ok(()) => debug!(client_id = %self.client_id, "heartbeat sent"),
            Err(e) if e.is_not_found() => {
                if let Err(e) = self.register().await {
                    warn!(client_id = %self.client_id, error = %e, "client re-registration failed");
                }
            }
            Err(e) => warn!(client_id = %self.client_id, error = %e, "heartbeat failed"),
        }
    }
}

/// Long-poll until shutdown. Errors back off exponentially; any success
/// resets the delay.
async fn watch_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(inner.settings.backoff_base(), inner.settings.backoff_max());
    loop {
        let outcome = tokio::select! {
            outcome = inner.poll_once() => outcome,
            _ = shutdown.changed() => break,
        };
        match outcome {
            Ok(event) => {
                backoff.reset();
                debug!(?event, "watch answered");
            }
            Err(e) => {
                if matches!(e, ClientError::Transport(_)) {
                    inner.forget_server().await;
                }
                let delay = backoff.next_delay();
                warn!(error = %e, retry_in = ?delay, "config watch failed");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
}

/// Run `tick` every `period` until `shutdown` flips.
async fn every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => tick().await,
            _ = shutdown.changed() => {
                debug!(task = name, "periodic task stopping");
                break;
            }
        }
    }
}

/// Stable server index for a client so load spreads across servers.
fn spread(client_id: &str, len: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    client_id.hash(&mut hasher);
    (hasher.finish() % len as u64) as usize
}
