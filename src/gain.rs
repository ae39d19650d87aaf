//! Gain Effect
//!
//! Amplifies or attenuates the signal by a decibel amount, after SoX
//! `gain.c` (Rob Sewell).

use crate::effect::{admit_value, db_to_linear, AudioEffect, EffectError, EffectState, SetOutcome};
use crate::params::{self, ParameterMap, ValueChangeKind};
use crate::AudioSample;

const PARAMETER_NAME_GAIN: &str = "Gain [dB]";

/// The SoX gain effect: one dB parameter, one multiplication per sample.
pub struct GainEffect {
    state: EffectState,
    map: ParameterMap,
    /// Cached linear factor derived from the dB parameter.
    gain_factor: f64,
}

impl GainEffect {
    pub fn new() -> Self {
        let mut map = ParameterMap::new();
        map.set_kind_real(PARAMETER_NAME_GAIN, -10.0, 10.0, 0.001);

        let mut effect = Self {
            state: EffectState::new(),
            map,
            gain_factor: 1.0,
        };
        effect.set_default_values();
        effect
    }
}

impl Default for GainEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEffect for GainEffect {
    fn name(&self) -> &'static str {
        "SoX Gain"
    }

    fn parameter_map(&self) -> &ParameterMap {
        &self.map
    }

    fn parameter_map_mut(&mut self) -> &mut ParameterMap {
        &mut self.map
    }

    fn set_default_values(&mut self) {
        self.set_value(PARAMETER_NAME_GAIN, "0", false);
    }

    fn prepare(&mut self, sample_rate: f64) -> Result<(), EffectError> {
        self.state.prepare(sample_rate)
    }

    fn release(&mut self) {
        self.state.release();
    }

    fn process(&mut self, time_position: f64, buffer: &mut [Vec<AudioSample>]) {
        self.state.begin_block(time_position, buffer.len());
        let gain = self.gain_factor;

        for samples in buffer.iter_mut() {
            for sample in samples.iter_mut() {
                *sample *= gain;
            }
        }
    }

    fn set_value(&mut self, name: &str, value: &str, _suppress_recalc: bool) -> ValueChangeKind {
        match admit_value(&mut self.map, name, value) {
            SetOutcome::Unchanged | SetOutcome::Refused => ValueChangeKind::NoChange,
            SetOutcome::Stored => {
                self.gain_factor = db_to_linear(params::to_real(self.map.value(name)));
                ValueChangeKind::ParameterChange
            }
        }
    }

    fn has_valid_parameters(&self) -> bool {
        self.state.parameters_are_valid
    }

    fn set_parameter_validity(&mut self, is_valid: bool) {
        self.state.parameters_are_valid = is_valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn stereo_block(value: AudioSample, length: usize) -> Vec<Vec<AudioSample>> {
        vec![vec![value; length]; 2]
    }

    #[test]
    fn test_default_is_unity() {
        let mut effect = GainEffect::new();
        effect.prepare(44100.0).unwrap();
        let mut buffer = stereo_block(0.5, 16);
        effect.process(0.0, &mut buffer);
        for channel in &buffer {
            for sample in channel {
                assert_abs_diff_eq!(*sample, 0.5, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_plus_six_db() {
        let mut effect = GainEffect::new();
        effect.prepare(44100.0).unwrap();
        assert_eq!(
            effect.set_value("Gain [dB]", "6", false),
            ValueChangeKind::ParameterChange
        );

        let mut buffer = stereo_block(0.5, 4);
        effect.process(0.0, &mut buffer);
        assert_abs_diff_eq!(buffer[0][0], 0.5 * db_to_linear(6.0), epsilon = 1e-6);
        assert_abs_diff_eq!(buffer[1][3], 0.997_631_157_484_44, epsilon = 1e-6);
    }

    #[test]
    fn test_out_of_range_is_refused() {
        let mut effect = GainEffect::new();
        assert_eq!(
            effect.set_value("Gain [dB]", "11", false),
            ValueChangeKind::NoChange
        );
        assert_eq!(effect.parameter_map().value("Gain [dB]"), "0");
    }
}
