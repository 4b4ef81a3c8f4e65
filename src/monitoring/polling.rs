use crate::monitoring::aggregator::LoadAggregator;
use crate::monitoring::backend::fetch_order_summaries;
use crate::monitoring::types::{MonitorConfig, OrderSummary};
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct PollTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Periodic full-list refresh of order summaries, independent of the push
/// transport. Push delivery is best effort, so this is the system of record
/// for which orders exist and what their status is; each successful fetch
/// replaces the published list wholesale and feeds the loading-eligible id
/// set into the aggregator's cleanup pass.
pub struct OrderPoller {
    orders: watch::Sender<Vec<OrderSummary>>,
    task: Mutex<Option<PollTask>>,
}

impl Default for OrderPoller {
    fn default() -> Self {
        let (orders, _) = watch::channel(Vec::new());
        Self {
            orders,
            task: Mutex::new(None),
        }
    }
}

impl OrderPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_orders(&self) -> watch::Receiver<Vec<OrderSummary>> {
        self.orders.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Starts the refresh loop; the first fetch happens immediately. A
    /// second start while running is a no-op.
    pub fn start(
        &self,
        client: Client,
        config: &MonitorConfig,
        aggregator: Arc<LoadAggregator>,
    ) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let orders = self.orders.clone();
        let base_url = config.api_base_url.clone();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match fetch_order_summaries(&client, &base_url).await {
                    Ok(summaries) => {
                        aggregator.cleanup(&loading_eligible_ids(&summaries));
                        let _ = orders.send(summaries);
                    }
                    // Keep publishing the last known list; the next tick
                    // retries.
                    Err(error) => debug!(%error, "order poll failed"),
                }
            }
        });

        *task = Some(PollTask { cancel, handle });
    }

    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if task.handle.await.is_err() {
                warn!("order poll task ended abnormally");
            }
        }
    }
}

/// Orders whose aggregator state should be retained on cleanup.
pub fn loading_eligible_ids(summaries: &[OrderSummary]) -> Vec<i64> {
    summaries
        .iter()
        .filter(|summary| summary.status.is_loading_eligible())
        .map(|summary| summary.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::OrderStatus;

    fn summary(id: i64, status: OrderStatus) -> OrderSummary {
        OrderSummary {
            id,
            number: format!("ORD-2024-{id:03}"),
            status,
            truck: format!("CAM-{id}"),
            preset: 25_000.0,
            accumulated: 0.0,
            last_temp: 0.0,
            density: 0.0,
            flow: 0.0,
            start_time: None,
        }
    }

    #[test]
    fn loading_eligible_ids_exclude_finalized_orders() {
        let summaries = vec![
            summary(1, OrderStatus::Loading),
            summary(2, OrderStatus::TaraRegistered),
            summary(3, OrderStatus::Finalized),
        ];

        assert_eq!(loading_eligible_ids(&summaries), vec![1, 2]);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let poller = OrderPoller::new();
        assert!(!poller.is_running());
        poller.stop().await;
        assert!(!poller.is_running());
    }
}
