//! # mavlink2rest Adapter
//!
//! [`TelemetrySource`] implementation over the mavlink2rest HTTP API.
//!
//! Each call walks an ordered list of candidate base URLs and returns on the
//! first candidate that answers every required sub-request:
//!
//! | Call | Required | Optional |
//! |------|----------|----------|
//! | `fetch_status` | `BATTERY_STATUS`, `HEARTBEAT` | `VFR_HUD` (depth) |
//! | `fetch_armed` | `HEARTBEAT` | |
//! | `fetch_actuator_outputs` | `SERVO_OUTPUT_RAW` | |
//!
//! Responses come in several envelope shapes depending on the service
//! version: `{"message": {...}, "status": {...}}`, a bare message object, or
//! an object keyed by the message name. [`unwrap_envelope`] normalises them.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::forwarder::named_value_payload;
use super::vehicle;
use super::{ActuatorOutputs, TelemetrySource, VehicleSnapshot, ACTUATOR_CHANNELS};
use crate::config::TelemetryConfig;
use crate::error::{OdometerError, Result};

/// MAV_MODE_FLAG_SAFETY_ARMED
pub const ARMED_FLAG: u64 = 0b1000_0000;

/// `voltages[]` entry meaning "cell not present".
const VOLTAGE_NOT_AVAILABLE: u64 = u16::MAX as u64;

/// `current_consumed` value meaning "autopilot does not estimate consumption".
const CONSUMED_NOT_AVAILABLE: f64 = -1.0;

/// Decoded HEARTBEAT fields we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub armed: bool,
    pub vehicle_type: Option<u8>,
}

/// Strip whichever envelope the endpoint wrapped the message in.
pub fn unwrap_envelope(body: Value, message_name: &str) -> Value {
    match body {
        Value::Object(mut map) => {
            if let Some(message) = map.remove("message") {
                if message.is_object() {
                    return message;
                }
                map.insert("message".to_string(), message);
            }
            if let Some(message) = map.remove(message_name) {
                if message.is_object() {
                    return message;
                }
                map.insert(message_name.to_string(), message);
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Decode `BATTERY_STATUS` into (voltage in V, consumed charge in mAh).
///
/// # Errors
///
/// Returns `MalformedMessage` when the message is not an object or carries
/// neither a voltage array nor a consumption figure.
pub fn parse_battery(message: &Value) -> Result<(f64, f64)> {
    let object = message
        .as_object()
        .ok_or_else(|| OdometerError::MalformedMessage("BATTERY_STATUS is not an object".into()))?;

    if !object.contains_key("voltages") && !object.contains_key("current_consumed") {
        return Err(OdometerError::MalformedMessage(
            "BATTERY_STATUS has neither voltages nor current_consumed".into(),
        ));
    }

    let voltage = object
        .get("voltages")
        .and_then(Value::as_array)
        .and_then(|cells| cells.first())
        .and_then(Value::as_u64)
        .filter(|&millivolts| millivolts != VOLTAGE_NOT_AVAILABLE)
        .map(|millivolts| millivolts as f64 / 1000.0)
        .unwrap_or(0.0);

    let consumed = object
        .get("current_consumed")
        .and_then(Value::as_f64)
        .filter(|&mah| mah != CONSUMED_NOT_AVAILABLE)
        .unwrap_or(0.0);

    Ok((voltage, consumed))
}

/// Decode `HEARTBEAT` into arm state and vehicle type.
///
/// `base_mode` is either `{"bits": n}` (mavlink2rest) or a bare integer
/// (older APIs). The vehicle type is either `mavtype: {"type": "MAV_TYPE_..."}`
/// or a numeric `type` field.
pub fn parse_heartbeat(message: &Value) -> Result<Heartbeat> {
    let base_mode = match message.get("base_mode") {
        Some(Value::Object(flags)) => flags.get("bits").and_then(Value::as_u64),
        Some(value) => value.as_u64(),
        None => None,
    }
    .ok_or_else(|| OdometerError::MalformedMessage("HEARTBEAT has no base_mode".into()))?;

    let vehicle_type = match message.get("mavtype").or_else(|| message.get("type")) {
        Some(Value::Object(tagged)) => tagged
            .get("type")
            .and_then(Value::as_str)
            .and_then(vehicle::code_from_name),
        Some(Value::String(name)) => vehicle::code_from_name(name),
        Some(value) => value.as_u64().and_then(|code| u8::try_from(code).ok()),
        None => None,
    };

    Ok(Heartbeat {
        armed: base_mode & ARMED_FLAG != 0,
        vehicle_type,
    })
}

/// Depth in metres from `VFR_HUD`. Submerged vehicles report negative altitude.
pub fn parse_depth(message: &Value) -> Option<f64> {
    message
        .get("alt")
        .and_then(Value::as_f64)
        .map(|alt| (-alt).max(0.0))
}

/// `servo1_raw`..`servo16_raw` from `SERVO_OUTPUT_RAW`. Missing channels read 0.
pub fn parse_servo_outputs(message: &Value) -> Result<ActuatorOutputs> {
    if message.get("servo1_raw").is_none() {
        return Err(OdometerError::MalformedMessage(
            "SERVO_OUTPUT_RAW has no servo1_raw".into(),
        ));
    }

    let mut outputs = [0u16; ACTUATOR_CHANNELS];
    for (index, output) in outputs.iter_mut().enumerate() {
        *output = message
            .get(format!("servo{}_raw", index + 1))
            .and_then(Value::as_u64)
            .and_then(|pwm| u16::try_from(pwm).ok())
            .unwrap_or(0);
    }
    Ok(outputs)
}

/// Parse a local-time response body.
///
/// Accepts a JSON string, a JSON object with a `datetime`, `local_time` or
/// `time` field, or plain text; each as RFC 3339 or naive ISO-8601.
pub fn parse_local_time(body: &str) -> Option<NaiveDateTime> {
    let text = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(text)) => text,
        Ok(Value::Object(map)) => ["datetime", "local_time", "time"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)?,
        _ => body.trim().to_string(),
    };

    parse_timestamp(&text)
}

/// Parse RFC 3339 (keeping the wall-clock part) or naive ISO-8601.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_local());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// mavlink2rest-backed telemetry source
#[derive(Debug, Clone)]
pub struct MavlinkRest {
    client: Client,
    endpoints: Vec<String>,
    post_endpoints: Vec<String>,
    local_time_url: Option<String>,
}

impl MavlinkRest {
    /// Build an adapter from the telemetry configuration.
    ///
    /// # Errors
    ///
    /// Returns `Http` if the HTTP client cannot be constructed.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            post_endpoints: config.post_endpoints.clone(),
            local_time_url: config.local_time_url.clone(),
        })
    }

    /// Candidate GET roots, in the order they are tried.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn get_message(&self, base: &str, name: &str) -> Result<Value> {
        let url = format!("{}/{}", base.trim_end_matches('/'), name);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(unwrap_envelope(body, name))
    }

    async fn status_from(&self, base: &str) -> Result<VehicleSnapshot> {
        let (voltage, consumed_mah) = parse_battery(&self.get_message(base, "BATTERY_STATUS").await?)?;
        let heartbeat = parse_heartbeat(&self.get_message(base, "HEARTBEAT").await?)?;

        let depth = match self.get_message(base, "VFR_HUD").await {
            Ok(message) => parse_depth(&message).unwrap_or(0.0),
            Err(e) => {
                debug!("No VFR_HUD from {}: {}", base, e);
                0.0
            }
        };

        Ok(VehicleSnapshot {
            available: true,
            voltage,
            armed: heartbeat.armed,
            consumed_mah,
            depth,
            vehicle_type: heartbeat.vehicle_type,
        })
    }

    /// Vehicle status from the first endpoint that answers.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryUnavailable` when every endpoint failed.
    pub async fn status(&self) -> Result<VehicleSnapshot> {
        for base in &self.endpoints {
            debug!("Trying vehicle status from {}", base);

            match self.status_from(base).await {
                Ok(snapshot) => {
                    debug!(
                        "Vehicle status from {}: voltage={}V armed={} consumed={}mAh depth={}m",
                        base, snapshot.voltage, snapshot.armed, snapshot.consumed_mah, snapshot.depth
                    );
                    return Ok(snapshot);
                }
                Err(e) => debug!("Vehicle status from {} failed: {}", base, e),
            }
        }

        Err(OdometerError::TelemetryUnavailable(format!(
            "no vehicle status from any of {} endpoints",
            self.endpoints.len()
        )))
    }
}

#[async_trait]
impl TelemetrySource for MavlinkRest {
    async fn fetch_status(&self) -> VehicleSnapshot {
        match self.status().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{}", e);
                VehicleSnapshot::unavailable()
            }
        }
    }

    async fn fetch_armed(&self) -> bool {
        for base in &self.endpoints {
            let heartbeat = match self.get_message(base, "HEARTBEAT").await {
                Ok(message) => parse_heartbeat(&message),
                Err(e) => Err(e),
            };

            match heartbeat {
                Ok(heartbeat) => return heartbeat.armed,
                Err(e) => debug!("HEARTBEAT from {} failed: {}", base, e),
            }
        }

        false
    }

    async fn fetch_actuator_outputs(&self) -> ActuatorOutputs {
        for base in &self.endpoints {
            let outputs = match self.get_message(base, "SERVO_OUTPUT_RAW").await {
                Ok(message) => parse_servo_outputs(&message),
                Err(e) => Err(e),
            };

            match outputs {
                Ok(outputs) => return outputs,
                Err(e) => debug!("SERVO_OUTPUT_RAW from {} failed: {}", base, e),
            }
        }

        [0; ACTUATOR_CHANNELS]
    }

    async fn push_named_value(&self, name: &str, value: f64) -> bool {
        let payload = named_value_payload(name, value);

        for url in &self.post_endpoints {
            match self.client.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Sent {}={} via {}", name, value, url);
                    return true;
                }
                Ok(response) => {
                    debug!("Push of {} to {} rejected with {}", name, url, response.status());
                }
                Err(e) => {
                    debug!("Push of {} to {} failed: {}", name, url, e);
                }
            }
        }

        warn!("Could not send {}={} to any telemetry endpoint", name, value);
        false
    }

    async fn fetch_local_time(&self) -> Option<NaiveDateTime> {
        let url = self.local_time_url.as_ref()?;

        let body = match self.client.get(url).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => response.text().await.ok()?,
                Err(e) => {
                    debug!("Local time endpoint {} failed: {}", url, e);
                    return None;
                }
            },
            Err(e) => {
                debug!("Local time endpoint {} unreachable: {}", url, e);
                return None;
            }
        };

        let parsed = parse_local_time(&body);
        if parsed.is_none() {
            info!("Unrecognised local time response from {}", url);
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_message_envelope() {
        let body = json!({
            "message": {"type": "HEARTBEAT", "base_mode": {"bits": 209}},
            "status": {"time": {"frequency": 1.0}}
        });
        let message = unwrap_envelope(body, "HEARTBEAT");
        assert_eq!(message["type"], "HEARTBEAT");
        assert!(message.get("status").is_none());
    }

    #[test]
    fn test_unwrap_named_envelope() {
        let body = json!({"BATTERY_STATUS": {"voltages": [15800]}});
        let message = unwrap_envelope(body, "BATTERY_STATUS");
        assert_eq!(message["voltages"][0], 15800);
    }

    #[test]
    fn test_unwrap_bare_message() {
        let body = json!({"voltages": [15800], "current_consumed": 120});
        let message = unwrap_envelope(body.clone(), "BATTERY_STATUS");
        assert_eq!(message, body);
    }

    #[test]
    fn test_parse_battery() {
        let message = json!({"voltages": [15800, 65535], "current_consumed": 1250});
        let (voltage, consumed) = parse_battery(&message).unwrap();
        assert!((voltage - 15.8).abs() < 1e-9);
        assert_eq!(consumed, 1250.0);
    }

    #[test]
    fn test_parse_battery_negative_consumption_kept() {
        let message = json!({"voltages": [16000], "current_consumed": -500});
        let (_, consumed) = parse_battery(&message).unwrap();
        assert_eq!(consumed, -500.0, "sign handling is the engine's job");
    }

    #[test]
    fn test_parse_battery_sentinels() {
        let message = json!({"voltages": [65535], "current_consumed": -1});
        let (voltage, consumed) = parse_battery(&message).unwrap();
        assert_eq!(voltage, 0.0);
        assert_eq!(consumed, 0.0);
    }

    #[test]
    fn test_parse_battery_rejects_unrelated_message() {
        assert!(parse_battery(&json!({"alt": -3.0})).is_err());
        assert!(parse_battery(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_parse_heartbeat_bits_object() {
        let message = json!({
            "base_mode": {"bits": 209},
            "mavtype": {"type": "MAV_TYPE_SUBMARINE"}
        });
        let heartbeat = parse_heartbeat(&message).unwrap();
        assert!(heartbeat.armed);
        assert_eq!(heartbeat.vehicle_type, Some(12));
    }

    #[test]
    fn test_parse_heartbeat_plain_integer() {
        let message = json!({"base_mode": 81, "type": 2});
        let heartbeat = parse_heartbeat(&message).unwrap();
        assert!(!heartbeat.armed);
        assert_eq!(heartbeat.vehicle_type, Some(2));
    }

    #[test]
    fn test_parse_heartbeat_missing_base_mode() {
        assert!(parse_heartbeat(&json!({"type": 12})).is_err());
    }

    #[test]
    fn test_parse_depth() {
        assert_eq!(parse_depth(&json!({"alt": -12.5})), Some(12.5));
        assert_eq!(parse_depth(&json!({"alt": 0.4})), Some(0.0));
        assert_eq!(parse_depth(&json!({"heading": 90})), None);
    }

    #[test]
    fn test_parse_servo_outputs() {
        let message = json!({
            "servo1_raw": 1500, "servo2_raw": 1700, "servo3_raw": 0,
            "servo9_raw": 1100
        });
        let outputs = parse_servo_outputs(&message).unwrap();
        assert_eq!(outputs[0], 1500);
        assert_eq!(outputs[1], 1700);
        assert_eq!(outputs[2], 0);
        assert_eq!(outputs[8], 1100);
        assert_eq!(outputs[15], 0);
    }

    #[test]
    fn test_parse_servo_outputs_wrong_message() {
        assert!(parse_servo_outputs(&json!({"alt": 1.0})).is_err());
    }

    #[test]
    fn test_parse_local_time_shapes() {
        let expected = NaiveDateTime::parse_from_str("2025-03-01T10:15:00", "%Y-%m-%dT%H:%M:%S").unwrap();

        assert_eq!(parse_local_time("\"2025-03-01T10:15:00\""), Some(expected));
        assert_eq!(parse_local_time("{\"datetime\": \"2025-03-01T10:15:00+02:00\"}"), Some(expected));
        assert_eq!(parse_local_time("2025-03-01 10:15:00\n"), Some(expected));
        assert_eq!(parse_local_time("{\"uptime\": 42}"), None);
        assert_eq!(parse_local_time("not a time"), None);
    }

    #[test]
    fn test_new_keeps_endpoint_order() {
        let config = TelemetryConfig::default();
        let adapter = MavlinkRest::new(&config).unwrap();
        assert_eq!(adapter.endpoints(), config.endpoints.as_slice());
        assert!(adapter.endpoints()[0].contains("host.docker.internal"));
    }

    #[test]
    fn test_no_endpoints_is_unavailable() {
        let config = TelemetryConfig {
            endpoints: Vec::new(),
            ..TelemetryConfig::default()
        };
        let adapter = MavlinkRest::new(&config).unwrap();

        let err = tokio_test::block_on(adapter.status()).unwrap_err();
        assert!(matches!(err, OdometerError::TelemetryUnavailable(_)));
        assert!(err.to_string().contains("0 endpoints"));
        assert_eq!(tokio_test::block_on(adapter.fetch_status()), VehicleSnapshot::unavailable());
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_yield_sentinels() {
        let config = TelemetryConfig {
            endpoints: vec!["http://127.0.0.1:9/messages".to_string()],
            post_endpoints: vec!["http://127.0.0.1:9/mavlink".to_string()],
            request_timeout_ms: 200,
            local_time_url: Some("http://127.0.0.1:9/time".to_string()),
            forward_enabled: true,
        };
        let adapter = MavlinkRest::new(&config).unwrap();

        assert!(matches!(adapter.status().await, Err(OdometerError::TelemetryUnavailable(_))));
        assert_eq!(adapter.fetch_status().await, VehicleSnapshot::unavailable());
        assert!(!adapter.fetch_armed().await);
        assert_eq!(adapter.fetch_actuator_outputs().await, [0; ACTUATOR_CHANNELS]);
        assert!(!adapter.push_named_value("ODO_UPTM", 1.0).await);
        assert_eq!(adapter.fetch_local_time().await, None);
    }
}
