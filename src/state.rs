use crate::error::MonitorError;
use crate::monitoring::aggregator::LoadAggregator;
use crate::monitoring::alarms::AlarmNotifier;
use crate::monitoring::backend::fetch_order_history;
use crate::monitoring::connection::ConnectionManager;
use crate::monitoring::polling::OrderPoller;
use crate::monitoring::types::{AlarmEvent, MonitorArgs, MonitorConfig, OrderSummary};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// One dashboard session's worth of monitoring machinery: the broker
/// connection, the telemetry aggregator, the alarm relay and the order
/// polling fallback, wired together and torn down as a unit. Constructed
/// explicitly by its owner; there is no hidden process-wide instance.
pub struct MonitorContext {
    config: MonitorConfig,
    http_client: Client,
    connection: ConnectionManager,
    aggregator: Arc<LoadAggregator>,
    alarms: AlarmNotifier,
    poller: OrderPoller,
}

impl MonitorContext {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            connection: ConnectionManager::new(config.clone()),
            aggregator: Arc::new(LoadAggregator::new()),
            alarms: AlarmNotifier::new(),
            poller: OrderPoller::new(),
            http_client: Client::new(),
            config,
        }
    }

    pub fn from_args(args: MonitorArgs) -> Result<Self, MonitorError> {
        Ok(Self::new(args.normalize()?))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn aggregator(&self) -> &Arc<LoadAggregator> {
        &self.aggregator
    }

    pub fn alarms(&self) -> &AlarmNotifier {
        &self.alarms
    }

    /// Starts the order-list refresh loop; safe to call repeatedly.
    pub fn start_order_polling(&self) {
        self.poller.start(
            self.http_client.clone(),
            &self.config,
            Arc::clone(&self.aggregator),
        );
    }

    pub fn watch_orders(&self) -> watch::Receiver<Vec<OrderSummary>> {
        self.poller.watch_orders()
    }

    /// Registers an alarm consumer, starting the relay on first use.
    /// Returns `None` when the alarm subscription cannot be established.
    pub async fn watch_alarms(&self) -> Option<mpsc::UnboundedReceiver<AlarmEvent>> {
        if !self.alarms.start(&self.connection).await {
            return None;
        }
        Some(self.alarms.watch())
    }

    /// Seeds an order's chart series from its historical samples. Returns
    /// how many samples were applied.
    pub async fn backfill_order(
        &self,
        order_id: i64,
        order_number: &str,
    ) -> Result<usize, MonitorError> {
        let history =
            fetch_order_history(&self.http_client, &self.config.api_base_url, order_number).await?;
        Ok(self.aggregator.backfill(order_id, &history))
    }

    /// Stops the poller and alarm relay and disconnects from the broker.
    /// Idempotent; safe on an already torn-down context.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
        self.alarms.stop().await;
        self.connection.disconnect().await;
    }
}
