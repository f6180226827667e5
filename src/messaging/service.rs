use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::db::{helpers::day_key, AggregateSnapshot, Database};
use crate::presenter::Badge;

use super::{Message, MessageClient, Reply};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub(crate) struct Envelope {
    pub message: Message,
    pub reply: Option<oneshot::Sender<Result<Reply>>>,
}

/// Owns the store and answers messages one at a time, so every write and
/// read is serialized. Re-publishes the badge after each write, each stats
/// query and on a fixed refresh interval.
pub struct BackgroundService {
    db: Database,
    clock: Arc<dyn Clock>,
    badge_tx: watch::Sender<Badge>,
}

pub struct ServiceHandle {
    client: MessageClient,
    badge_rx: watch::Receiver<Badge>,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn client(&self) -> MessageClient {
        self.client.clone()
    }

    pub fn badge(&self) -> watch::Receiver<Badge> {
        self.badge_rx.clone()
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.await {
            log_error!("background service failed to join: {err:?}");
        }
    }
}

impl BackgroundService {
    pub fn spawn(db: Database, clock: Arc<dyn Clock>, badge_refresh: Duration) -> ServiceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (badge_tx, badge_rx) = watch::channel(Badge::default());
        let cancel_token = CancellationToken::new();

        let service = Self {
            db,
            clock,
            badge_tx,
        };
        let handle = tokio::spawn(service.run(rx, badge_refresh, cancel_token.clone()));

        ServiceHandle {
            client: MessageClient::new(tx),
            badge_rx,
            cancel_token,
            handle,
        }
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        badge_refresh: Duration,
        cancel_token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(badge_refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    log_info!("background service shutting down");
                    break;
                }
                envelope = rx.recv() => {
                    let Some(envelope) = envelope else {
                        log_info!("all message clients dropped, stopping background service");
                        break;
                    };
                    self.handle(envelope).await;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh_badge().await {
                        log_warn!("periodic badge refresh failed: {err:?}");
                    }
                }
            }
        }
    }

    async fn handle(&self, envelope: Envelope) {
        let Envelope { message, reply } = envelope;
        let result = self.dispatch(message).await;

        match reply {
            Some(reply) => {
                if reply.send(result).is_err() {
                    log_warn!("message sender dropped before receiving the reply");
                }
            }
            None => {
                if let Err(err) = result {
                    log_error!("failed to handle message: {err:?}");
                }
            }
        }
    }

    async fn dispatch(&self, message: Message) -> Result<Reply> {
        match message {
            Message::ReportReel { .. } | Message::ReportShort { .. } => {
                if let Some((category, duration)) = message.as_report() {
                    self.db
                        .record_observation(category, duration, self.clock.now())
                        .await?;
                    log_info!("recorded {category} observation of {duration}s");
                }
                self.refresh_badge().await?;
                Ok(Reply::Done)
            }
            Message::GetStats => {
                let snapshot = self.refresh_badge().await?;
                Ok(Reply::Stats(snapshot))
            }
            Message::ResetStats => {
                self.db.reset().await?;
                log_info!("aggregate stats reset");
                self.refresh_badge().await?;
                Ok(Reply::Done)
            }
        }
    }

    async fn refresh_badge(&self) -> Result<AggregateSnapshot> {
        let snapshot = self.db.read_aggregate().await?;
        let badge = Badge::from_snapshot(&snapshot, &day_key(self.clock.now()));
        self.badge_tx.send_if_modified(|current| {
            if *current == badge {
                false
            } else {
                *current = badge;
                true
            }
        });
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detection::Category;
    use crate::session::CompletedObservation;
    use chrono::{TimeZone, Utc};

    fn spawn_at(db: Database, day: u32) -> (ServiceHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap(),
        ));
        let handle = BackgroundService::spawn(db, clock.clone(), Duration::from_secs(30));
        (handle, clock)
    }

    #[tokio::test]
    async fn reports_update_store_and_badge() {
        let (service, _clock) = spawn_at(Database::in_memory().unwrap(), 1);
        let client = service.client();
        let mut badge = service.badge();

        client
            .record(CompletedObservation {
                category: Category::Reels,
                duration_secs: 45,
            })
            .await
            .unwrap();
        client
            .record(CompletedObservation {
                category: Category::Shorts,
                duration_secs: 10,
            })
            .await
            .unwrap();

        let stats = client.get_stats().await.unwrap();
        assert_eq!(stats.reels.total_time, 45);
        assert_eq!(stats.shorts.count, 1);
        assert_eq!(stats.day("2025-06-01").total_time(), 55);

        assert!(badge.has_changed().unwrap());
        let current = badge.borrow_and_update().clone();
        assert_eq!(current.text, "1m");
        assert_eq!(current.tooltip, "2 videos watched");

        service.shutdown().await;
    }

    #[tokio::test]
    async fn fire_and_forget_reports_are_processed_in_order() {
        let (service, _clock) = spawn_at(Database::in_memory().unwrap(), 1);
        let client = service.client();

        client.post(Message::ReportReel { duration: 5 }).unwrap();
        client.post(Message::ReportReel { duration: 6 }).unwrap();
        let stats = client.get_stats().await.unwrap();
        assert_eq!(stats.reels.count, 2);
        assert_eq!(stats.reels.total_time, 11);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let (service, _clock) = spawn_at(Database::in_memory().unwrap(), 1);
        let client = service.client();
        client.post(Message::ReportShort { duration: 30 }).unwrap();
        client.reset().await.unwrap();

        assert_eq!(client.get_stats().await.unwrap(), AggregateSnapshot::default());
        assert_eq!(service.badge().borrow().text, "");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn undersized_request_reports_an_error_and_writes_nothing() {
        let (service, _clock) = spawn_at(Database::in_memory().unwrap(), 1);
        let client = service.client();
        assert!(client
            .request(Message::ReportShort { duration: 1 })
            .await
            .is_err());
        assert_eq!(client.get_stats().await.unwrap().shorts.count, 0);
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_refresh_rolls_badge_over_at_midnight() {
        let (service, clock) = spawn_at(Database::in_memory().unwrap(), 1);
        let client = service.client();
        let mut badge = service.badge();

        client.post(Message::ReportReel { duration: 120 }).unwrap();
        client.get_stats().await.unwrap();
        assert_eq!(badge.borrow_and_update().text, "2m");

        clock.advance_ms(24 * 3_600_000);
        tokio::time::sleep(Duration::from_secs(31)).await;
        badge.changed().await.unwrap();
        assert_eq!(badge.borrow().text, "1");

        service.shutdown().await;
    }
}
