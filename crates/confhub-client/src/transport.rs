//! The network seam of the client runtime.
//!
//! [`HttpTransport`] talks to real discover and config server processes;
//! tests plug in an in-process implementation.

use std::time::Duration;

use async_trait::async_trait;
use confhub_core::http::post_json;
use confhub_core::wire::{
    ClientConfigList, ExitRequest, ListRequest, RegisterRequest, WatchReply, WatchRequest,
};
use confhub_core::{DiscoverClient, EnvType, InstanceRecord, Role, RunStatus};

use crate::error::ClientResult;

#[async_trait]
pub trait ConfigTransport: Send + Sync {
    /// Online config servers of `env`.
    async fn discover(&self, env: EnvType) -> ClientResult<Vec<InstanceRecord>>;

    /// Add this client to the discover client registry.
    async fn register(&self, req: &RegisterRequest) -> ClientResult<()>;

    async fn heartbeat(&self, id: &str, status: Option<RunStatus>) -> ClientResult<()>;

    /// Long-poll `server` for a change.
    async fn watch(&self, server: &str, req: &WatchRequest) -> ClientResult<WatchReply>;

    async fn pull(&self, server: &str, req: &ListRequest) -> ClientResult<ClientConfigList>;

    async fn exit(&self, server: &str, instance_id: u64) -> ClientResult<()>;
}

pub struct HttpTransport {
    discover: DiscoverClient,
    request_timeout: Duration,
    watch_timeout: Duration,
}

impl HttpTransport {
    pub fn new(discover_addr: &str, request_timeout: Duration, watch_timeout: Duration) -> Self {
        Self {
            discover: DiscoverClient::new(discover_addr).with_timeout(request_timeout),
            request_timeout,
            watch_timeout,
        }
    }
}

#[async_trait]
impl ConfigTransport for HttpTransport {
    async fn discover(&self, env: EnvType) -> ClientResult<Vec<InstanceRecord>> {
        Ok(self.discover.fetch(Role::Server, Some(env)).await?)
    }

    async fn register(&self, req: &RegisterRequest) -> ClientResult<()> {
        self.discover.register(Role::Client, req).await?;
        Ok(())
    }

    async fn heartbeat(&self, id: &str, status: Option<RunStatus>) -> ClientResult<()> {
        self.discover.heartbeat(Role::Client, id, status).await?;
        Ok(())
    }

    async fn watch(&self, server: &str, req: &WatchRequest) -> ClientResult<WatchReply> {
        Ok(post_json(server, "/api/v1/client/config/watch", req, self.watch_timeout).await?)
    }

    async fn pull(&self, server: &str, req: &ListRequest) -> ClientResult<ClientConfigList> {
        Ok(post_json(server, "/api/v1/client/config/list", req, self.request_timeout).await?)
    }

    async fn exit(&self, server: &str, instance_id: u64) -> ClientResult<()> {
        let _: String = post_json(
            server,
            "/api/v1/client/exit",
            &ExitRequest { instance_id },
            self.request_timeout,
        )
        .await?;
        Ok(())
    }
}
