use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use loading_monitor::monitoring::backend::{accept_alarm, fetch_alarms, pending_alarms};
use loading_monitor::{MonitorArgs, MonitorContext, TelemetrySample};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

#[derive(Clone, Default)]
struct MockApiState {
    orders: Arc<Mutex<Value>>,
    history: Arc<Mutex<Value>>,
    accepted_alarm_ids: Arc<Mutex<Vec<i64>>>,
}

async fn orders_route(State(state): State<MockApiState>) -> Json<Value> {
    Json(state.orders.lock().clone())
}

async fn history_route(
    State(state): State<MockApiState>,
    Path(_order_number): Path<String>,
) -> Json<Value> {
    Json(state.history.lock().clone())
}

async fn alarms_route() -> Json<Value> {
    Json(json!([
        {
            "id": 1,
            "alarmState": true,
            "currentTemperature": 24.5,
            "thresholdTemperature": 20.0,
            "eventDateTime": "2024-03-05T12:30:00",
            "orderNumber": "ORD-2024-001"
        },
        {
            "id": 2,
            "alarmState": false,
            "currentTemperature": 21.0,
            "thresholdTemperature": 20.0,
            "eventDateTime": "2024-03-05T11:00:00",
            "orderNumber": "ORD-2024-002"
        }
    ]))
}

async fn accept_alarm_route(
    State(state): State<MockApiState>,
    Path(alarm_id): Path<i64>,
) -> Json<Value> {
    state.accepted_alarm_ids.lock().push(alarm_id);
    Json(json!({"ok": true}))
}

async fn spawn_mock_api(state: MockApiState) -> String {
    let app = Router::new()
        .route("/orders", get(orders_route))
        .route("/orders/number/:number/history", get(history_route))
        .route("/alarms", get(alarms_route))
        .route("/alarms/reset-email/:id", put(accept_alarm_route))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener should expose address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });

    format!("http://127.0.0.1:{}", addr.port())
}

fn order_json(id: i64, status: &str) -> Value {
    json!({
        "id": id,
        "number": format!("ORD-2024-{id:03}"),
        "status": status,
        "truck": format!("CAM-10{id}"),
        "preset": 25000.0,
        "accumulated": 0.0,
        "lastTemp": 18.0,
        "density": 0.83,
        "flow": 0.0,
        "startTime": null
    })
}

fn test_context(base_url: &str) -> MonitorContext {
    MonitorContext::from_args(MonitorArgs {
        api_base_url: Some(base_url.to_string()),
        poll_interval_ms: Some(100),
        ..MonitorArgs::default()
    })
    .expect("test args should be valid")
}

fn sample(timestamp_ms: i64, accumulated_mass: f64) -> TelemetrySample {
    TelemetrySample {
        timestamp_ms,
        accumulated_mass,
        caudal: 500.0,
        temperature: 18.0,
        density: 0.83,
    }
}

#[tokio::test]
async fn poller_publishes_orders_wholesale_and_prunes_finished_aggregator_state() {
    let state = MockApiState::default();
    *state.orders.lock() = json!([order_json(5, "LOADING"), order_json(7, "LOADING")]);
    let base_url = spawn_mock_api(state.clone()).await;
    let context = test_context(&base_url);

    context.aggregator().record_sample(5, &sample(60_000, 10.0));
    context.aggregator().record_sample(7, &sample(60_000, 100.0));

    let mut orders = context.watch_orders();
    context.start_order_polling();
    // Starting again while running is a no-op.
    context.start_order_polling();

    timeout(Duration::from_secs(2), orders.changed())
        .await
        .expect("order list within deadline")
        .expect("poller should stay alive");
    assert_eq!(orders.borrow().len(), 2);
    assert!(context.aggregator().has_series(5));
    assert!(context.aggregator().has_series(7));

    // Order 5 finishes loading; the next refresh prunes its state.
    *state.orders.lock() = json!([order_json(5, "FINALIZED"), order_json(7, "LOADING")]);

    timeout(Duration::from_secs(2), async {
        loop {
            orders.changed().await.expect("poller should stay alive");
            if !context.aggregator().has_series(5) {
                return;
            }
        }
    })
    .await
    .expect("cleanup within deadline");

    assert!(context.aggregator().has_series(7));
    assert_eq!(context.aggregator().snapshot(7).accumulated_mass, 100.0);
    assert_eq!(context.aggregator().snapshot(5).accumulated_mass, 0.0);

    context.shutdown().await;
}

#[tokio::test]
async fn backfill_seeds_chart_series_from_order_history() {
    let state = MockApiState::default();
    *state.history.lock() = json!([
        {"timestamp": 60_000, "accumulatedMass": 100, "caudal": 500, "temperature": 18, "density": 0.83},
        {"timestamp": 61_000, "accumulatedMass": 150, "caudal": 510, "temperature": 18.2, "density": 0.83}
    ]);
    let base_url = spawn_mock_api(state).await;
    let context = test_context(&base_url);

    let applied = context
        .backfill_order(7, "ORD-2024-007")
        .await
        .expect("history fetch should succeed");

    assert_eq!(applied, 2);
    let series = context.aggregator().series(7);
    assert_eq!(series.accumulated_mass, vec![100.0, 150.0]);
    assert_eq!(series.caudal, vec![500.0, 510.0]);
    assert_eq!(context.aggregator().snapshot(7).accumulated_mass, 150.0);
}

#[tokio::test]
async fn fetches_and_accepts_alarms_over_rest() {
    let state = MockApiState::default();
    let base_url = spawn_mock_api(state.clone()).await;
    let client = reqwest::Client::new();

    let alarms = fetch_alarms(&client, &base_url)
        .await
        .expect("alarm list should fetch");
    assert_eq!(alarms.len(), 2);

    let pending = pending_alarms(&alarms);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].order_number, "ORD-2024-001");

    accept_alarm(&client, &base_url, pending[0].id)
        .await
        .expect("alarm accept should succeed");
    assert_eq!(*state.accepted_alarm_ids.lock(), vec![1]);
}
