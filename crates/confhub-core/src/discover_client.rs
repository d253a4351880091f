//! HTTP client for the discover service.
//!
//! Used by config servers to register and heartbeat themselves, and by
//! config clients to find an online server for their environment.

use std::time::Duration;

use crate::http::{HttpError, post_json};
use crate::types::{EnvType, InstanceRecord, RunStatus};
use crate::wire::{FetchRequest, HeartbeatRequest, InstanceList, RegisterRequest};

/// Which registry a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    fn segment(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoverClient {
    address: String,
    timeout: Duration,
}

impl DiscoverClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn register(&self, role: Role, req: &RegisterRequest) -> Result<String, HttpError> {
        let path = format!("/api/v1/discover/{}/register", role.segment());
        post_json(&self.address, &path, req, self.timeout).await
    }

    pub async fn heartbeat(
        &self,
        role: Role,
        id: &str,
        status: Option<RunStatus>,
    ) -> Result<String, HttpError> {
        let path = format!("/api/v1/discover/{}/heartbeat", role.segment());
        let req = HeartbeatRequest {
            id: id.to_string(),
            status,
        };
        post_json(&self.address, &path, &req, self.timeout).await
    }

    /// Online members of a registry, optionally restricted to one env.
    pub async fn fetch(
        &self,
        role: Role,
        env: Option<EnvType>,
    ) -> Result<Vec<InstanceRecord>, HttpError> {
        let path = format!("/api/v1/discover/{}/fetch", role.segment());
        let list: InstanceList =
            post_json(&self.address, &path, &FetchRequest { env }, self.timeout).await?;
        Ok(list.list)
    }
}
