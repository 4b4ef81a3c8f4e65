mod error;
pub mod monitoring;
mod state;

pub use error::MonitorError;
pub use monitoring::aggregator::{LoadAggregator, OrderChartSeries, OrderMetricsSnapshot};
pub use monitoring::alarms::AlarmNotifier;
pub use monitoring::connection::{
    AlarmSubscription, ConnectionManager, OrderDetailSubscription, TopicSubscription,
};
pub use monitoring::polling::OrderPoller;
pub use monitoring::types::{
    AlarmEvent, ConnectionState, MonitorArgs, MonitorConfig, OrderStatus, OrderSummary,
    TelemetrySample, TemperatureAlarm,
};
pub use state::MonitorContext;
