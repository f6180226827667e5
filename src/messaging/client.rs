use anyhow::{anyhow, bail, Result};
use tokio::sync::{mpsc, oneshot};

use crate::db::AggregateSnapshot;
use crate::session::CompletedObservation;

use super::service::Envelope;
use super::{Message, ObservationSink, Reply};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Cheap, cloneable sender side of the background service.
#[derive(Clone)]
pub struct MessageClient {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MessageClient {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Fire-and-forget; failures are only visible in the service log.
    pub fn post(&self, message: Message) -> Result<()> {
        self.tx
            .send(Envelope {
                message,
                reply: None,
            })
            .map_err(|_| anyhow!("background service is not running"))
    }

    pub async fn request(&self, message: Message) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                reply: Some(reply_tx),
            })
            .map_err(|_| anyhow!("background service is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("background service dropped the request"))?
    }

    /// Like a report, but waits until the write has committed.
    pub async fn record(&self, observation: CompletedObservation) -> Result<()> {
        self.request(observation.into()).await.map(|_| ())
    }

    pub async fn get_stats(&self) -> Result<AggregateSnapshot> {
        match self.request(Message::GetStats).await? {
            Reply::Stats(snapshot) => Ok(snapshot),
            Reply::Done => bail!("GET_STATS answered without stats"),
        }
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(Message::ResetStats).await.map(|_| ())
    }

    /// Dispatches a raw wire message. Only `GET_STATS` has a response body.
    pub async fn send_json(&self, raw: &str) -> Result<Option<serde_json::Value>> {
        let message = Message::parse(raw)?;
        if message == Message::GetStats {
            let snapshot = self.get_stats().await?;
            return Ok(Some(serde_json::to_value(snapshot)?));
        }
        self.post(message)?;
        Ok(None)
    }
}

impl ObservationSink for MessageClient {
    fn submit(&self, observation: CompletedObservation) {
        if let Err(err) = self.post(observation.into()) {
            log_warn!(
                "dropping {} observation of {}s: {err}",
                observation.category,
                observation.duration_secs
            );
        }
    }
}
