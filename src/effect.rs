//! Audio Effect Contract
//!
//! The host-agnostic trait every effect in this crate implements, the
//! transport/base state shared by all of them, and the crate error type.
//!
//! Control flow from the host's point of view: construct the effect, call
//! [`AudioEffect::prepare`] with the session sample rate, then repeatedly
//! [`AudioEffect::process`] on the audio thread. Between blocks the
//! (serialized) control path may call [`AudioEffect::set_value`]. Nothing
//! on the processing path allocates or fails.

use libm::Libm;

use crate::params::{ParameterMap, ValueChangeKind};
use crate::AudioSample;

/// Error surface of the crate. Out-of-range and unknown-parameter
/// conditions are normally absorbed as [`ValueChangeKind::NoChange`];
/// the remaining variants travel to the host on setup and persistence
/// paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// A value outside a parameter's declared range.
    OutOfRange,
    /// A parameter name that is not in the map.
    UnknownParameter,
    /// A value whose form does not match the parameter kind.
    TypeMismatch,
    /// An operation in the wrong lifecycle state (e.g. preparing with a
    /// non-positive sample rate).
    InvalidState(String),
    /// A persistence payload that cannot be understood at all.
    BadPersistence(String),
}

impl core::fmt::Display for EffectError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EffectError::OutOfRange => write!(f, "value out of range"),
            EffectError::UnknownParameter => write!(f, "unknown parameter"),
            EffectError::TypeMismatch => write!(f, "value does not match parameter kind"),
            EffectError::InvalidState(message) => write!(f, "invalid state: {}", message),
            EffectError::BadPersistence(message) => {
                write!(f, "bad persistence payload: {}", message)
            }
        }
    }
}

impl std::error::Error for EffectError {}

/// Convert a decibel value into a linear factor (`10^(dB/quotient)`).
#[inline]
pub fn db_to_linear_with_quotient(db_value: f64, quotient: f64) -> f64 {
    Libm::<f64>::pow(10.0, db_value / quotient)
}

/// Convert a decibel value into a linear amplitude factor.
#[inline]
pub fn db_to_linear(db_value: f64) -> f64 {
    db_to_linear_with_quotient(db_value, 20.0)
}

/// Transport threshold above which a time delta counts as a jump.
const TIME_JUMP_THRESHOLD: f64 = 0.1;

/// Sample rate assumed before the host ever called `prepare`.
const UNPREPARED_SAMPLE_RATE: f64 = 100.0;

/// State common to every effect: sample rate, channel count, transport
/// positions and the parameter-validity flag.
#[derive(Debug, Clone)]
pub struct EffectState {
    pub sample_rate: f64,
    pub channel_count: usize,
    pub current_time_position: f64,
    pub previous_time_position: f64,
    pub time_position_has_moved: bool,
    pub parameters_are_valid: bool,
}

impl EffectState {
    pub fn new() -> Self {
        Self {
            sample_rate: UNPREPARED_SAMPLE_RATE,
            channel_count: 0,
            current_time_position: f64::INFINITY,
            previous_time_position: f64::INFINITY,
            time_position_has_moved: true,
            parameters_are_valid: false,
        }
    }

    /// Adopt a new sample rate; rejects non-positive rates.
    pub fn prepare(&mut self, sample_rate: f64) -> Result<(), EffectError> {
        if sample_rate <= 0.0 || sample_rate.is_nan() {
            return Err(EffectError::InvalidState(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        self.previous_time_position = f64::INFINITY;
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// Drop per-playback transport knowledge.
    pub fn release(&mut self) {
        self.previous_time_position = f64::INFINITY;
    }

    /// Record the transport position and channel count at block start and
    /// derive the has-moved flag: true when the transport went backwards
    /// or jumped forward by more than 0.1 s since the previous block.
    pub fn begin_block(&mut self, time_position: f64, channel_count: usize) {
        self.current_time_position = time_position;
        self.channel_count = channel_count;
        let difference = time_position - self.previous_time_position;
        self.time_position_has_moved = difference < 0.0 || difference > TIME_JUMP_THRESHOLD;
        self.previous_time_position = time_position;
    }
}

impl Default for EffectState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of the shared `set_value` admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetOutcome {
    /// The value equals the stored one; nothing to do (cycle breaking).
    Unchanged,
    /// The value was refused by validation; the map is untouched.
    Refused,
    /// The value was stored; the effect must update derived state.
    Stored,
}

/// Admission check every effect runs before reacting to a parameter set:
/// identical values short-circuit, invalid values are refused, accepted
/// values are stored in the map.
pub(crate) fn admit_value(map: &mut ParameterMap, name: &str, value: &str) -> SetOutcome {
    if map.contains(name) && map.value(name) == value {
        SetOutcome::Unchanged
    } else if !map.is_allowed_value(name, value) {
        SetOutcome::Refused
    } else {
        map.set_value(name, value);
        SetOutcome::Stored
    }
}

/// A host-loadable audio effect: a parameter map plus a block-processing
/// kernel. The audio buffer is channel-major; effects overwrite it in
/// place.
pub trait AudioEffect {
    /// Display name of the effect; also the title line of its persisted
    /// state.
    fn name(&self) -> &'static str;

    fn parameter_map(&self) -> &ParameterMap;

    fn parameter_map_mut(&mut self) -> &mut ParameterMap;

    /// Load the effect's default parameter values.
    fn set_default_values(&mut self);

    /// Announce the sample rate for upcoming processing. May allocate.
    fn prepare(&mut self, sample_rate: f64) -> Result<(), EffectError>;

    /// Release per-playback resources.
    fn release(&mut self);

    /// Process one block in place. `buffer[channel][i]` holds the input
    /// samples on entry and the output samples on return. Must not
    /// allocate or block.
    fn process(&mut self, time_position: f64, buffer: &mut [Vec<AudioSample>]);

    /// Set a parameter from its string form. Invalid values are refused
    /// with [`ValueChangeKind::NoChange`]. With `suppress_recalc` the
    /// derived DSP state is not rebuilt (used while restoring persisted
    /// state, where only the final set triggers the rebuild).
    fn set_value(&mut self, name: &str, value: &str, suppress_recalc: bool) -> ValueChangeKind;

    fn has_valid_parameters(&self) -> bool;

    fn set_parameter_validity(&mut self, is_valid: bool);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_db_to_linear() {
        assert_abs_diff_eq!(db_to_linear(0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(db_to_linear(20.0), 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(db_to_linear(6.0), 1.995262314968879, epsilon = 1e-12);
        assert_abs_diff_eq!(db_to_linear_with_quotient(10.0, 10.0), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_prepare_rejects_bad_sample_rate() {
        let mut state = EffectState::new();
        assert!(state.prepare(0.0).is_err());
        assert!(state.prepare(-44100.0).is_err());
        assert!(state.prepare(f64::NAN).is_err());
        assert!(state.prepare(48000.0).is_ok());
        assert_eq!(state.sample_rate, 48000.0);
    }

    #[test]
    fn test_time_jump_detection() {
        let mut state = EffectState::new();
        state.prepare(44100.0).unwrap();

        // first block after prepare counts as moved
        state.begin_block(0.0, 2);
        assert!(state.time_position_has_moved);

        // contiguous playback does not
        state.begin_block(0.01, 2);
        assert!(!state.time_position_has_moved);
        state.begin_block(0.11, 2);
        assert!(!state.time_position_has_moved);

        // a forward seek and a rewind do
        state.begin_block(5.0, 2);
        assert!(state.time_position_has_moved);
        state.begin_block(1.0, 2);
        assert!(state.time_position_has_moved);
    }

    #[test]
    fn test_release_forgets_transport() {
        let mut state = EffectState::new();
        state.prepare(44100.0).unwrap();
        state.begin_block(0.0, 2);
        state.begin_block(0.01, 2);
        assert!(!state.time_position_has_moved);
        state.release();
        state.begin_block(0.02, 2);
        assert!(state.time_position_has_moved);
    }

    #[test]
    fn test_admit_value_outcomes() {
        let mut map = ParameterMap::new();
        map.set_kind_real("Gain [dB]", -10.0, 10.0, 0.001);
        assert_eq!(admit_value(&mut map, "Gain [dB]", "3"), SetOutcome::Stored);
        assert_eq!(admit_value(&mut map, "Gain [dB]", "3"), SetOutcome::Unchanged);
        assert_eq!(admit_value(&mut map, "Gain [dB]", "99"), SetOutcome::Refused);
        assert_eq!(admit_value(&mut map, "Nope", "1"), SetOutcome::Refused);
        assert_eq!(map.value("Gain [dB]"), "3");
    }
}
