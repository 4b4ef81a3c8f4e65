use crate::error::MonitorError;
use crate::monitoring::now_unix_ms;
use crate::monitoring::types::{OrderDetailWire, OrderSummary, TelemetrySample, TemperatureAlarm};
use reqwest::Client;

fn orders_endpoint(base_url: &str) -> String {
    format!("{base_url}/orders")
}

fn order_by_number_endpoint(base_url: &str, order_number: &str) -> String {
    format!("{base_url}/orders/number/{order_number}")
}

fn order_history_endpoint(base_url: &str, order_number: &str) -> String {
    format!("{base_url}/orders/number/{order_number}/history")
}

fn alarms_endpoint(base_url: &str) -> String {
    format!("{base_url}/alarms")
}

fn accept_alarm_endpoint(base_url: &str, alarm_id: i64) -> String {
    format!("{base_url}/alarms/reset-email/{alarm_id}")
}

/// Full order-summary list; the authoritative source for which orders exist
/// and what their status is.
pub async fn fetch_order_summaries(
    client: &Client,
    base_url: &str,
) -> Result<Vec<OrderSummary>, MonitorError> {
    let response = client
        .get(orders_endpoint(base_url))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<Vec<OrderSummary>>().await?)
}

pub async fn fetch_order_by_number(
    client: &Client,
    base_url: &str,
    order_number: &str,
) -> Result<OrderSummary, MonitorError> {
    let response = client
        .get(order_by_number_endpoint(base_url, order_number))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<OrderSummary>().await?)
}

/// Historical detail samples for one order, oldest first, used to backfill
/// charts before live telemetry takes over.
pub async fn fetch_order_history(
    client: &Client,
    base_url: &str,
    order_number: &str,
) -> Result<Vec<TelemetrySample>, MonitorError> {
    let response = client
        .get(order_history_endpoint(base_url, order_number))
        .send()
        .await?
        .error_for_status()?;
    let wires = response.json::<Vec<OrderDetailWire>>().await?;

    let received_at_ms = now_unix_ms();
    Ok(wires
        .into_iter()
        .map(|wire| TelemetrySample::from_wire(wire, received_at_ms))
        .collect())
}

pub async fn fetch_alarms(
    client: &Client,
    base_url: &str,
) -> Result<Vec<TemperatureAlarm>, MonitorError> {
    let response = client
        .get(alarms_endpoint(base_url))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<Vec<TemperatureAlarm>>().await?)
}

pub fn pending_alarms(alarms: &[TemperatureAlarm]) -> Vec<TemperatureAlarm> {
    alarms
        .iter()
        .filter(|alarm| alarm.alarm_state)
        .cloned()
        .collect()
}

pub fn accepted_alarms(alarms: &[TemperatureAlarm]) -> Vec<TemperatureAlarm> {
    alarms
        .iter()
        .filter(|alarm| !alarm.alarm_state)
        .cloned()
        .collect()
}

/// Flips a pending alarm to accepted on the backend.
pub async fn accept_alarm(
    client: &Client,
    base_url: &str,
    alarm_id: i64,
) -> Result<(), MonitorError> {
    client
        .put(accept_alarm_endpoint(base_url, alarm_id))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://localhost:8080/api/v1";

    #[test]
    fn orders_endpoint_is_correct() {
        assert_eq!(orders_endpoint(BASE), "http://localhost:8080/api/v1/orders");
    }

    #[test]
    fn order_by_number_endpoint_includes_number() {
        let endpoint = order_by_number_endpoint(BASE, "ORD-2024-001");
        assert!(endpoint.ends_with("/orders/number/ORD-2024-001"));
    }

    #[test]
    fn order_history_endpoint_targets_history_resource() {
        let endpoint = order_history_endpoint(BASE, "ORD-2024-001");
        assert!(endpoint.ends_with("/orders/number/ORD-2024-001/history"));
    }

    #[test]
    fn accept_alarm_endpoint_includes_id() {
        assert_eq!(
            accept_alarm_endpoint(BASE, 12),
            "http://localhost:8080/api/v1/alarms/reset-email/12"
        );
    }

    #[test]
    fn splits_alarms_by_pending_state() {
        let alarms = vec![
            TemperatureAlarm {
                id: 1,
                alarm_state: true,
                current_temperature: 24.5,
                threshold_temperature: 20.0,
                event_date_time: "2024-03-05T12:30:00".to_string(),
                order_number: "ORD-2024-001".to_string(),
            },
            TemperatureAlarm {
                id: 2,
                alarm_state: false,
                current_temperature: 21.0,
                threshold_temperature: 20.0,
                event_date_time: "2024-03-05T11:00:00".to_string(),
                order_number: "ORD-2024-002".to_string(),
            },
        ];

        let pending = pending_alarms(&alarms);
        let accepted = accepted_alarms(&alarms);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 1);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id, 2);
    }
}
