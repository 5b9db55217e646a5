//! Connection pool. At-most-one live TCP client per gateway
//! endpoint, with reconnect-on-fault. The prior version dialed a single
//! configured Modbus host once per process and looped forever on that one
//! connection (`main.rs`'s outer reconnect loop); this generalizes that
//! same "reconnect forever, log and retry" shape to a keyed map of
//! gateways the scheduler fans out across.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_modbus::client::{tcp, Context};
use tracing::{info, warn};

use crate::error::PoolError;
use crate::model::GatewayEndpoint;

const CONNECT_RETRIES: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Slot {
    client: Option<Context>,
}

/// Process-wide pool of Modbus-TCP clients, one per `GatewayEndpoint`.
/// Entries are protected by a per-endpoint `tokio::sync::Mutex`: only the
/// per-gateway sequential reader ever touches a given client in practice,
/// but holding the mutex for the duration of a gateway's cycle makes that
/// invariant explicit and lets `acquire` safely reconnect under concurrent
/// error-path disconnects.
pub struct ConnectionPool {
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

/// A handle to a gateway's client, held for the duration of one
/// per-gateway sequential read — at most one register read is ever in
/// flight on a given gateway.
pub struct PooledClient {
    guard: tokio::sync::OwnedMutexGuard<Slot>,
    endpoint: GatewayEndpoint,
}

impl PooledClient {
    pub fn context_mut(&mut self) -> &mut Context {
        self.guard
            .client
            .as_mut()
            .expect("PooledClient always wraps a connected client")
    }

    /// Clears the client this guard already holds, in place. Callers that
    /// already hold a `PooledClient` must use this instead of
    /// `ConnectionPool::mark_disconnected` — re-acquiring the same
    /// endpoint's slot lock from the task that's already holding it would
    /// deadlock against `tokio::sync::Mutex`, which isn't re-entrant.
    pub fn mark_disconnected(&mut self) {
        self.guard.client = None;
        warn!(gateway = %self.endpoint, "marked gateway disconnected");
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot_for(&self, endpoint: &GatewayEndpoint) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(endpoint.key())
            .or_insert_with(|| Arc::new(Mutex::new(Slot { client: None })))
            .clone()
    }

    /// Returns a connected client for `endpoint`, reconnecting if none
    /// exists or the cached one was marked disconnected. Retries the TCP
    /// connect up to 5 times with a 2s pause; final failure surfaces
    /// `GatewayUnreachable`.
    pub async fn acquire(&self, endpoint: &GatewayEndpoint) -> Result<PooledClient, PoolError> {
        let slot = self.slot_for(endpoint).await;
        let mut guard = slot.lock_owned().await;

        if guard.client.is_none() {
            let addr: SocketAddr = format!("{}:{}", endpoint.ip, endpoint.port)
                .parse()
                .map_err(|_| PoolError::GatewayUnreachable(endpoint.key()))?;
            guard.client = Some(connect_with_retry(addr, endpoint).await?);
        }

        Ok(PooledClient {
            guard,
            endpoint: endpoint.clone(),
        })
    }

    /// Records a fault against `endpoint` when no `PooledClient` for it is
    /// held by the calling task (e.g. `acquire` itself failed). If a
    /// `PooledClient` is already held, call `PooledClient::mark_disconnected`
    /// on it instead — this method re-locks the endpoint's slot, which
    /// would deadlock if called while that same slot's guard is held.
    pub async fn mark_disconnected(&self, endpoint: &GatewayEndpoint) {
        let slot = self.slot_for(endpoint).await;
        let mut guard = slot.lock().await;
        guard.client = None;
        warn!(gateway = %endpoint, "marked gateway disconnected");
    }

    /// Graceful teardown on shutdown.
    pub async fn close_all(&self) {
        let mut slots = self.slots.lock().await;
        for (key, slot) in slots.drain() {
            let mut guard = slot.lock().await;
            if guard.client.take().is_some() {
                info!(gateway = %key, "closed gateway connection");
            }
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_with_retry(
    addr: SocketAddr,
    endpoint: &GatewayEndpoint,
) -> Result<Context, PoolError> {
    let mut last_err = None;
    for attempt in 1..=CONNECT_RETRIES {
        match tokio::time::timeout(REQUEST_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                info!(gateway = %endpoint, attempt, "connected to gateway");
                return Ok(tcp::attach(stream));
            }
            Ok(Err(e)) => {
                warn!(gateway = %endpoint, attempt, error = %e, "connect failed, retrying");
                last_err = Some(e);
            }
            Err(_) => {
                warn!(gateway = %endpoint, attempt, "connect timed out, retrying");
            }
        }
        if attempt < CONNECT_RETRIES {
            sleep(CONNECT_RETRY_DELAY).await;
        }
    }
    let _ = last_err;
    Err(PoolError::GatewayUnreachable(endpoint.key()))
}
