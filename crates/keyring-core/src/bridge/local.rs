//! In-process bridge: a [`BridgeHost`] running on its own task

use super::{BridgeChannel, BridgeHost, BridgeRequest, BridgeResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const QUEUE_DEPTH: usize = 32;

struct Envelope {
    request: BridgeRequest,
    reply: oneshot::Sender<BridgeResponse>,
}

/// Channel to a host task; the host sees envelopes one at a time
#[derive(Clone)]
pub struct LocalBridge {
    tx: mpsc::Sender<Envelope>,
}

impl LocalBridge {
    /// Move `host` onto a task and return the channel to it
    ///
    /// Must be called within a tokio runtime. The task ends when every
    /// `LocalBridge` clone is dropped, closing any open transport.
    pub fn spawn(mut host: BridgeHost) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let response = host.handle(envelope.request).await;
                // Caller may have given up waiting
                let _ = envelope.reply.send(response);
            }
            host.release().await;
            debug!("Bridge host stopped");
        });

        Self { tx }
    }
}

#[async_trait]
impl BridgeChannel for LocalBridge {
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| Error::TransportUnavailable("bridge host stopped".into()))?;
        response
            .await
            .map_err(|_| Error::TransportUnavailable("bridge host dropped the request".into()))
    }
}
