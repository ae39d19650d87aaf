//! LFO Waveform Generator
//!
//! Band-limited sine and piecewise-linear triangle waveforms read from two
//! process-wide tables. The read cursor is a linear function of a step
//! counter (`position = first + step · increment mod L`) rather than an
//! accumulated sum, so a million `advance()` calls land exactly where one
//! big jump would, with no rounding runoff.
//!
//! The table construction follows SoX `synth.c` (Carsten Borchardt, Rob
//! Sewell).

use core::f64::consts::TAU;
use std::sync::OnceLock;

use libm::Libm;
use serde::{Deserialize, Serialize};

use crate::AudioSample;

/// Number of sampling points in the shared sine table.
const SINE_TABLE_LENGTH: usize = 10_000;

/// For a triangle read with linear interpolation, four equidistant points
/// reproduce the waveform exactly.
const TRIANGLE_TABLE_LENGTH: usize = 4;

static SINE_TABLE: OnceLock<Vec<AudioSample>> = OnceLock::new();
static TRIANGLE_TABLE: OnceLock<Vec<AudioSample>> = OnceLock::new();

/// The supported LFO waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveformKind {
    Sine,
    Triangle,
}

/// Step-counter snapshot used to save and restore an LFO trajectory.
pub type WaveformState = u64;

/// Positive modulus for table positions and radian phases.
#[inline]
fn modulo(value: f64, divisor: f64) -> f64 {
    let remainder = Libm::<f64>::fmod(value, divisor);
    if remainder < 0.0 {
        remainder + divisor
    } else {
        remainder
    }
}

/// Build a wave table with values in [0, 1].
fn build_wave_table(kind: WaveformKind, length: usize) -> Vec<AudioSample> {
    let delta = TAU / length as f64;
    (0..length)
        .map(|i| {
            let x = i as f64;
            match kind {
                WaveformKind::Sine => (Libm::<f64>::sin(x * delta) + 1.0) / 2.0,
                WaveformKind::Triangle => {
                    let quadrant = (x * 4.0 / length as f64) as usize;
                    let y = x * 2.0 / length as f64;
                    match quadrant {
                        0 => y + 0.5,
                        3 => y - 1.5,
                        _ => 1.5 - y,
                    }
                }
            }
        })
        .collect()
}

fn wave_table(kind: WaveformKind) -> &'static [AudioSample] {
    match kind {
        WaveformKind::Sine => {
            SINE_TABLE.get_or_init(|| build_wave_table(WaveformKind::Sine, SINE_TABLE_LENGTH))
        }
        WaveformKind::Triangle => TRIANGLE_TABLE
            .get_or_init(|| build_wave_table(WaveformKind::Triangle, TRIANGLE_TABLE_LENGTH)),
    }
}

/// An oscillator reading one of the shared wave tables.
#[derive(Debug, Clone)]
pub struct Waveform {
    kind: WaveformKind,
    table: &'static [AudioSample],
    first_position: f64,
    increment: f64,
    step_count: WaveformState,
    position: f64,
    minimum_value: f64,
    maximum_value: f64,
    has_integer_values: bool,
}

impl Waveform {
    pub fn new() -> Self {
        let mut waveform = Self {
            kind: WaveformKind::Sine,
            table: wave_table(WaveformKind::Sine),
            first_position: 0.0,
            increment: 0.0,
            step_count: 0,
            position: 0.0,
            minimum_value: 0.0,
            maximum_value: 1.0,
            has_integer_values: false,
        };
        waveform.set(1000.0, WaveformKind::Sine, 0.0, 1.0, 0.0, false);
        waveform
    }

    pub fn kind(&self) -> WaveformKind {
        self.kind
    }

    /// Configure the oscillator for one period of `period_samples` samples,
    /// output range `[minimum_value, maximum_value]` and a starting phase
    /// in radians. With `has_integer_values` the output is rounded to the
    /// nearest integer (used for delay-line indices).
    pub fn set(
        &mut self,
        period_samples: f64,
        kind: WaveformKind,
        minimum_value: f64,
        maximum_value: f64,
        phase: f64,
        has_integer_values: bool,
    ) {
        assert!(period_samples > 0.0, "waveform period must be positive");

        let table = wave_table(kind);
        let table_length = table.len() as f64;
        let first_position = modulo(table_length * phase / TAU, table_length);

        self.kind = kind;
        self.table = table;
        self.first_position = first_position;
        self.increment = table_length / period_samples;
        self.step_count = 0;
        self.position = first_position;
        self.minimum_value = minimum_value;
        self.maximum_value = maximum_value;
        self.has_integer_values = has_integer_values;
    }

    /// Value at the current cursor position.
    pub fn current(&self) -> f64 {
        let table_length = self.table.len();
        let index_a = (self.position as usize) % table_length;
        let index_b = (index_a + 1) % table_length;
        let fraction = self.position - Libm::<f64>::floor(self.position);
        let raw =
            self.table[index_a] * (1.0 - fraction) + self.table[index_b] * fraction;

        let value = self.minimum_value + (self.maximum_value - self.minimum_value) * raw;
        if self.has_integer_values {
            Libm::<f64>::round(value)
        } else {
            value
        }
    }

    /// Step the cursor by one sample. The position is recomputed from the
    /// step count, never accumulated.
    #[inline]
    pub fn advance(&mut self) {
        self.step_count += 1;
        self.position = self.position_for(self.step_count);
    }

    /// Rewind to the configured starting phase.
    pub fn reset(&mut self) {
        self.step_count = 0;
        self.position = self.first_position;
    }

    pub fn state(&self) -> WaveformState {
        self.step_count
    }

    pub fn set_state(&mut self, state: WaveformState) {
        self.step_count = state;
        self.position = self.position_for(state);
    }

    #[inline]
    fn position_for(&self, step_count: WaveformState) -> f64 {
        modulo(
            self.first_position + step_count as f64 * self.increment,
            self.table.len() as f64,
        )
    }

    /// Phase in radians of an oscillator of frequency `frequency` that
    /// started at transport time `time_offset`, observed at
    /// `current_time`. This is how effects re-lock their LFO to the
    /// transport after the host seeks.
    pub fn phase_by_time(frequency: f64, time_offset: f64, current_time: f64) -> f64 {
        let delta_time = current_time - time_offset;
        let turns = delta_time * frequency;
        let phase = (turns - Libm::<f64>::floor(turns)) * TAU;
        modulo(phase, TAU)
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sine_table_shape() {
        let table = wave_table(WaveformKind::Sine);
        assert_eq!(table.len(), SINE_TABLE_LENGTH);
        assert_abs_diff_eq!(table[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(table[SINE_TABLE_LENGTH / 4], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(table[3 * SINE_TABLE_LENGTH / 4], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_triangle_table_points() {
        let table = wave_table(WaveformKind::Triangle);
        assert_eq!(table, &[0.5, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_cursor_is_drift_free() {
        let mut waveform = Waveform::new();
        waveform.set(337.7, WaveformKind::Sine, 0.0, 1.0, 1.234, false);
        let increment = waveform.increment;
        let first = waveform.first_position;

        const STEPS: u64 = 1_000_000;
        for _ in 0..STEPS {
            waveform.advance();
        }

        let expected = modulo(first + STEPS as f64 * increment, SINE_TABLE_LENGTH as f64);
        assert_abs_diff_eq!(waveform.position, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_triangle_interpolation_is_exact() {
        // four table points plus linear interpolation reproduce the
        // triangle at every phase
        let mut waveform = Waveform::new();
        waveform.set(16.0, WaveformKind::Triangle, 0.0, 1.0, 0.0, false);

        let expected = [
            0.5, 0.625, 0.75, 0.875, 1.0, 0.875, 0.75, 0.625, 0.5, 0.375, 0.25, 0.125, 0.0,
            0.125, 0.25, 0.375,
        ];
        for value in expected {
            assert_abs_diff_eq!(waveform.current(), value, epsilon = 1e-12);
            waveform.advance();
        }
        // and the cycle repeats
        assert_abs_diff_eq!(waveform.current(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut waveform = Waveform::new();
        waveform.set(100.0, WaveformKind::Triangle, -1.0, 1.0, 0.0, false);
        for _ in 0..41 {
            waveform.advance();
        }
        let state = waveform.state();
        let value = waveform.current();

        waveform.reset();
        assert_eq!(waveform.state(), 0);
        waveform.set_state(state);
        assert_abs_diff_eq!(waveform.current(), value, epsilon = 1e-15);
    }

    #[test]
    fn test_current_spans_configured_range() {
        let mut waveform = Waveform::new();
        waveform.set(1000.0, WaveformKind::Sine, 0.25, 0.75, 0.0, false);
        let mut minimum = f64::MAX;
        let mut maximum = f64::MIN;
        for _ in 0..1000 {
            let value = waveform.current();
            minimum = minimum.min(value);
            maximum = maximum.max(value);
            waveform.advance();
        }
        assert_abs_diff_eq!(minimum, 0.25, epsilon = 1e-3);
        assert_abs_diff_eq!(maximum, 0.75, epsilon = 1e-3);
    }

    #[test]
    fn test_integer_snap_rounds() {
        let mut waveform = Waveform::new();
        waveform.set(8.0, WaveformKind::Sine, 1.0, 10.0, 0.0, true);
        for _ in 0..32 {
            let value = waveform.current();
            assert_eq!(value, Libm::<f64>::round(value));
            waveform.advance();
        }
    }

    #[test]
    fn test_phase_by_time_locks_to_transport() {
        // Zero at the start, zero after a full period, quarter turn at a
        // quarter period.
        let zero = Waveform::phase_by_time(2.0, 1.5, 1.5);
        assert_abs_diff_eq!(modulo(zero, TAU), 0.0, epsilon = 1e-12);

        let full = Waveform::phase_by_time(2.0, 1.5, 2.0);
        assert_abs_diff_eq!(modulo(full, TAU), 0.0, epsilon = 1e-12);

        let quarter = Waveform::phase_by_time(0.25, 0.0, 1.0);
        assert_abs_diff_eq!(quarter, core::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_phase_by_time_is_nonnegative_before_offset() {
        let phase = Waveform::phase_by_time(1.0, 10.0, 9.25);
        assert!(phase >= 0.0 && phase < TAU);
        assert_abs_diff_eq!(phase, 0.75 * TAU, epsilon = 1e-12);
    }
}
