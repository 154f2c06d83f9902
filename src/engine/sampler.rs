//! # Duty Sampler
//!
//! Higher-frequency PWM sampling while the vehicle is armed. Feeds the
//! per-thruster and per-accessory PWM averages and the active mission's peak
//! deviation from neutral.

use tracing::trace;

use super::Engine;
use crate::telemetry::{ActuatorOutputs, TelemetrySource};

/// Largest `|pwm - neutral|` over the driven (nonzero) channels.
///
/// # Examples
///
/// ```
/// use rov_odometer::engine::sampler::max_deviation;
///
/// let mut outputs = [0u16; 16];
/// outputs[0] = 1700;
/// outputs[3] = 1150;
/// assert_eq!(max_deviation(&outputs, 1500), Some(350));
/// assert_eq!(max_deviation(&[0u16; 16], 1500), None);
/// ```
pub fn max_deviation(outputs: &ActuatorOutputs, neutral: u16) -> Option<u16> {
    outputs
        .iter()
        .filter(|&&pwm| pwm != 0)
        .map(|&pwm| pwm.abs_diff(neutral))
        .max()
}

impl Engine {
    /// Take one duty sample if the vehicle is armed.
    ///
    /// Returns the sample's peak deviation, or `None` when disarmed or when
    /// no channel was driven.
    pub async fn sample(&self, source: &dyn TelemetrySource) -> Option<u16> {
        if !source.fetch_armed().await {
            return None;
        }
        let outputs = source.fetch_actuator_outputs().await;
        self.record_sample(&outputs)
    }

    /// Fold one set of servo outputs into the accumulators.
    ///
    /// Each lock is taken and released in turn; a concurrent tick may run
    /// between them.
    pub fn record_sample(&self, outputs: &ActuatorOutputs) -> Option<u16> {
        self.thrusters.lock().value.record_outputs(outputs);
        self.accessories.lock().value.record_outputs(outputs);

        let deviation = max_deviation(outputs, self.neutral_pwm)?;
        if let Some(mission) = self.state.lock().current.as_mut() {
            mission.observe_pwm_deviation(deviation);
            mission.refresh_hard_use(&self.limits);
        }
        trace!("Duty sample: peak deviation {}", deviation);
        Some(deviation)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::telemetry::mocks::ScriptedSource;
    use crate::telemetry::ACTUATOR_CHANNELS;
    use tempfile::TempDir;

    fn outputs(values: &[(usize, u16)]) -> ActuatorOutputs {
        let mut outputs = [0u16; ACTUATOR_CHANNELS];
        for &(channel, pwm) in values {
            outputs[channel - 1] = pwm;
        }
        outputs
    }

    #[test]
    fn test_max_deviation_ignores_undriven() {
        assert_eq!(max_deviation(&outputs(&[(1, 1500), (2, 1500)]), 1500), Some(0));
        assert_eq!(max_deviation(&outputs(&[(16, 1100)]), 1500), Some(400));
    }

    #[test]
    fn test_sample_feeds_thrusters_and_accessories() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.add_accessory("Lights", 9).unwrap();
        engine.apply_tick(minute(0), &reading(16.0, 0.0, true), None);

        engine.record_sample(&outputs(&[(1, 1600), (2, 1400), (9, 1900)]));
        engine.record_sample(&outputs(&[(1, 1800), (9, 1100)]));

        let thrusters = engine.thrusters();
        assert_eq!(thrusters[0].average_pwm, Some(1700.0));
        assert_eq!(thrusters[1].average_pwm, Some(1400.0));
        assert_eq!(thrusters[2].average_pwm, None);

        let lights = &engine.accessories()[0];
        assert_eq!(lights.duty.average_pwm(), Some(1500.0));
        assert_eq!(lights.duty.pwm_samples, 2);
    }

    #[test]
    fn test_stored_accessory_with_bad_channel_is_harmless() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        std::fs::create_dir_all(&config.storage.data_dir).unwrap();
        std::fs::write(
            config.storage.data_dir.join("accessories.json"),
            r#"[{"id": 1, "name": "Lights", "channel": 0, "run_minutes": 5},
                {"id": 2, "name": "Gripper", "channel": 10, "run_minutes": 0}]"#,
        )
        .unwrap();

        let engine = Engine::open(&config).unwrap();
        assert_eq!(engine.record_sample(&outputs(&[(1, 1600), (10, 1700)])), Some(200));

        let accessories = engine.accessories();
        assert_eq!(accessories.len(), 1);
        assert_eq!(accessories[0].duty.average_pwm(), Some(1700.0));
    }

    #[test]
    fn test_mission_peak_never_decreases() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.apply_tick(minute(0), &reading(16.0, 0.0, true), None);

        let mut peak = 0;
        for pwm in [1600, 1900, 1550, 1200, 1500] {
            engine.record_sample(&outputs(&[(1, pwm)]));
            let mission = engine.current_mission().unwrap();
            assert!(mission.max_pwm_deviation >= peak);
            peak = mission.max_pwm_deviation;
        }
        assert_eq!(peak, 400);
        assert!(engine.current_mission().unwrap().hard_use);
    }

    #[test]
    fn test_peak_resets_for_mission_after_swap() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.apply_tick(minute(0), &reading(15.0, 4000.0, true), None);
        engine.record_sample(&outputs(&[(1, 1850)]));

        engine.apply_tick(minute(1), &reading(16.6, 10.0, true), None);
        assert_eq!(engine.missions()[0].max_pwm_deviation, 350);
        assert_eq!(engine.current_mission().unwrap().max_pwm_deviation, 0);

        engine.record_sample(&outputs(&[(1, 1600)]));
        assert_eq!(engine.current_mission().unwrap().max_pwm_deviation, 100);
    }

    #[tokio::test]
    async fn test_sample_skipped_while_disarmed() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.apply_tick(minute(0), &reading(16.0, 0.0, false), None);

        let source = ScriptedSource::new(vec![reading(16.0, 0.0, false)]);
        source.set_outputs(outputs(&[(1, 1900)]));
        source.fetch_status().await;

        assert_eq!(engine.sample(&source).await, None);
        assert_eq!(engine.current_mission().unwrap().max_pwm_deviation, 0);
    }

    #[tokio::test]
    async fn test_sample_while_armed() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.apply_tick(minute(0), &reading(16.0, 0.0, true), None);

        let source = ScriptedSource::new(vec![reading(16.0, 0.0, true)]);
        source.set_outputs(outputs(&[(1, 1720)]));
        source.fetch_status().await;

        assert_eq!(engine.sample(&source).await, Some(220));
        assert_eq!(engine.thrusters()[0].average_pwm, Some(1720.0));
    }
}
