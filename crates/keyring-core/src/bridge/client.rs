//! Caller side of the hardware bridge

use super::{BridgeChannel, BridgeRequest, ACTION_CLOSE_TRANSPORT};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A bridge call awaiting its response
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Correlation ID
    pub id: Uuid,
    /// Device family
    pub target: String,
    /// Device method
    pub action: String,
    /// When the request entered the queue
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    fn new(target: &str, action: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.to_string(),
            action: action.to_string(),
            created_at: Utc::now(),
        }
    }

    fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

/// Sends envelopes over a [`BridgeChannel`]
///
/// Devices process one command at a time, so calls to the same target are
/// serialized here. There are no automatic retries: a device-side failure
/// may already have had user-visible effects.
pub struct BridgeClient {
    channel: Arc<dyn BridgeChannel>,
    queues: DashMap<String, Arc<Mutex<()>>>,
    pending: DashMap<Uuid, PendingRequest>,
    timeout: Duration,
}

impl BridgeClient {
    /// Client over `channel`; `timeout` bounds each round-trip including transport acquisition
    pub fn new(channel: Arc<dyn BridgeChannel>, timeout: Duration) -> Self {
        Self {
            channel,
            queues: DashMap::new(),
            pending: DashMap::new(),
            timeout,
        }
    }

    /// Requests currently queued or in flight
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    fn queue(&self, target: &str) -> Arc<Mutex<()>> {
        self.queues
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Call `action` on `target` and return the response fields
    #[instrument(skip_all, fields(target_device = %target, action = %action))]
    pub async fn call(
        &self,
        target: &str,
        action: &str,
        params: Vec<Value>,
    ) -> Result<Map<String, Value>> {
        let request = PendingRequest::new(target, action);
        let id = request.id;
        self.pending.insert(id, request.clone());

        let result = self.round_trip(&request, params).await;
        self.pending.remove(&id);

        match &result {
            Ok(_) => debug!(elapsed_ms = request.elapsed_ms(), "Bridge call completed"),
            Err(e) => warn!(elapsed_ms = request.elapsed_ms(), error = %e, "Bridge call failed"),
        }
        result
    }

    /// Ask the host to close whatever device transport it holds open
    pub async fn release(&self) -> Result<()> {
        self.call("", ACTION_CLOSE_TRANSPORT, Vec::new()).await.map(drop)
    }

    async fn round_trip(
        &self,
        request: &PendingRequest,
        params: Vec<Value>,
    ) -> Result<Map<String, Value>> {
        let queue = self.queue(&request.target);
        let _turn = queue.lock().await;

        let envelope = BridgeRequest {
            target: request.target.clone(),
            action: request.action.clone(),
            params,
        };

        let response = tokio::time::timeout(self.timeout, self.channel.send(envelope))
            .await
            .map_err(|_| Error::ProtocolTimeout(format!("{}.{}", request.target, request.action)))??;
        response.into_result()
    }
}
