use crate::monitoring::connection::ConnectionManager;
use crate::monitoring::types::AlarmEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct RelayTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Relays every event from the global alarm topic to all registered
/// consumers, verbatim and in transport order. Holds no alarm state of its
/// own; one notifier instance serves the whole dashboard session.
#[derive(Default)]
pub struct AlarmNotifier {
    consumers: std::sync::Arc<Mutex<Vec<mpsc::UnboundedSender<AlarmEvent>>>>,
    relay: Mutex<Option<RelayTask>>,
}

impl AlarmNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a consumer channel. Consumers registered before `start`
    /// receive events as soon as the relay runs; closed consumers are pruned
    /// on the next delivery.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<AlarmEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.consumers.lock().push(sender);
        receiver
    }

    pub fn is_running(&self) -> bool {
        self.relay.lock().is_some()
    }

    /// Opens the long-lived alarm subscription and starts the relay loop.
    /// Returns `false` when the subscription is unavailable (connection
    /// could not be established). Calling it while already running is a
    /// no-op returning `true`.
    pub async fn start(&self, connection: &ConnectionManager) -> bool {
        if self.is_running() {
            return true;
        }

        let Some(mut subscription) = connection.subscribe_alarms().await else {
            return false;
        };

        let cancel = CancellationToken::new();
        let relay_cancel = cancel.clone();
        let consumers = std::sync::Arc::clone(&self.consumers);
        let handle = tokio::spawn(async move {
            loop {
                let alarm = tokio::select! {
                    _ = relay_cancel.cancelled() => break,
                    alarm = subscription.recv() => alarm,
                };
                let Some(alarm) = alarm else {
                    debug!("alarm subscription ended, stopping relay");
                    break;
                };
                fan_out(&consumers, alarm);
            }
        });

        *self.relay.lock() = Some(RelayTask { cancel, handle });
        true
    }

    pub async fn stop(&self) {
        let relay = self.relay.lock().take();
        if let Some(relay) = relay {
            relay.cancel.cancel();
            let _ = relay.handle.await;
        }
    }
}

fn fan_out(
    consumers: &std::sync::Arc<Mutex<Vec<mpsc::UnboundedSender<AlarmEvent>>>>,
    alarm: AlarmEvent,
) {
    consumers
        .lock()
        .retain(|consumer| consumer.send(alarm.clone()).is_ok());
}
