//! # Metric Forwarder
//!
//! Pushes a small subset of odometer counters back onto the vehicle's own
//! telemetry bus as `NAMED_VALUE_FLOAT` messages, so they show up next to the
//! regular vehicle telemetry in the ground station.
//!
//! Delivery is best effort: a metric no target accepts is logged and dropped.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::TelemetrySource;

/// Width of the MAVLink `NAMED_VALUE_FLOAT.name` field.
pub const NAME_WIDTH: usize = 10;

/// Fit a metric name into the fixed-width field: truncated, then NUL-padded.
///
/// # Examples
///
/// ```
/// use rov_odometer::telemetry::forwarder::{fixed_width_name, NAME_WIDTH};
///
/// let name = fixed_width_name("ODO_UPTM");
/// assert_eq!(name.len(), NAME_WIDTH);
/// assert_eq!(name[7], 'M');
/// assert_eq!(name[8], '\0');
/// ```
pub fn fixed_width_name(name: &str) -> [char; NAME_WIDTH] {
    let mut field = ['\0'; NAME_WIDTH];
    for (slot, c) in field.iter_mut().zip(name.chars()) {
        *slot = c;
    }
    field
}

/// Request body for pushing one named value through mavlink2rest.
pub fn named_value_payload(name: &str, value: f64) -> Value {
    let name: Vec<String> = fixed_width_name(name).iter().map(|c| c.to_string()).collect();

    json!({
        "header": {
            "system_id": 255,
            "component_id": 0,
            "sequence": 0
        },
        "message": {
            "type": "NAMED_VALUE_FLOAT",
            "time_boot_ms": 0,
            "value": value,
            "name": name
        }
    })
}

/// The counters forwarded after every tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForwardedMetrics {
    pub total_minutes: u64,
    pub armed_minutes: u64,
    pub disarmed_minutes: u64,
    pub dive_minutes: u64,
    pub battery_swaps: u64,
    pub startups: u64,
    pub total_wh_consumed: f64,
}

impl ForwardedMetrics {
    /// Bus name / value pairs in send order.
    pub fn named_values(&self) -> [(&'static str, f64); 7] {
        [
            ("ODO_UPTM", self.total_minutes as f64),
            ("ODO_ARMM", self.armed_minutes as f64),
            ("ODO_DARM", self.disarmed_minutes as f64),
            ("ODO_DIVE", self.dive_minutes as f64),
            ("ODO_BSWP", self.battery_swaps as f64),
            ("ODO_STRT", self.startups as f64),
            ("ODO_WH", self.total_wh_consumed),
        ]
    }
}

/// Push every forwarded metric. Returns how many were accepted.
pub async fn forward(source: &dyn TelemetrySource, metrics: &ForwardedMetrics) -> usize {
    let mut delivered = 0;

    for (name, value) in metrics.named_values() {
        if source.push_named_value(name, value).await {
            delivered += 1;
        }
    }

    if delivered == 0 {
        warn!("No forwarded metric reached the vehicle");
    } else {
        debug!("Forwarded {} metrics", delivered);
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MockTelemetrySource;

    #[test]
    fn test_fixed_width_name_pads() {
        let field = fixed_width_name("ODO_WH");
        assert_eq!(field.iter().filter(|c| **c == '\0').count(), 4);
        assert_eq!(field[..6].iter().collect::<String>(), "ODO_WH");
    }

    #[test]
    fn test_fixed_width_name_truncates() {
        let field = fixed_width_name("ODO_VERY_LONG_NAME");
        assert_eq!(field.iter().collect::<String>(), "ODO_VERY_L");
    }

    #[test]
    fn test_payload_shape() {
        let payload = named_value_payload("ODO_BSWP", 3.0);
        assert_eq!(payload["header"]["system_id"], 255);
        assert_eq!(payload["message"]["type"], "NAMED_VALUE_FLOAT");
        assert_eq!(payload["message"]["value"], 3.0);

        let name = payload["message"]["name"].as_array().unwrap();
        assert_eq!(name.len(), NAME_WIDTH);
        assert_eq!(name[0], "O");
        assert_eq!(name[9], "\u{0}");
    }

    #[test]
    fn test_named_values_order() {
        let metrics = ForwardedMetrics {
            total_minutes: 10,
            armed_minutes: 4,
            disarmed_minutes: 6,
            dive_minutes: 2,
            battery_swaps: 1,
            startups: 3,
            total_wh_consumed: 12.5,
        };
        let names: Vec<&str> = metrics.named_values().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["ODO_UPTM", "ODO_ARMM", "ODO_DARM", "ODO_DIVE", "ODO_BSWP", "ODO_STRT", "ODO_WH"]
        );
        assert_eq!(metrics.named_values()[6].1, 12.5);
    }

    #[tokio::test]
    async fn test_forward_pushes_every_metric() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_push_named_value()
            .times(7)
            .returning(|_, _| true);

        let delivered = forward(&source, &ForwardedMetrics::default()).await;
        assert_eq!(delivered, 7);
    }

    #[tokio::test]
    async fn test_forward_counts_failures() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_push_named_value()
            .withf(|name, _| name == "ODO_WH")
            .times(1)
            .returning(|_, _| false);
        source
            .expect_push_named_value()
            .times(6)
            .returning(|_, _| true);

        let delivered = forward(&source, &ForwardedMetrics::default()).await;
        assert_eq!(delivered, 6);
    }
}
