//! Biquad-Family Filter Effect
//!
//! One effect covering the SoX second-order filter zoo: allpass, band,
//! bandpass, bandreject, bass, raw biquad, equalizer, highpass, lowpass
//! and treble. Coefficient derivations follow SoX `biquads.c` (and
//! `band.c` for the exponential-pole band filter), which in turn follow
//! the audio EQ cookbook.
//!
//! The filter kind selects which parameters exist; switching the kind
//! rebuilds the parameter map and reports a global change.

use core::f64::consts::TAU;

use libm::Libm;
use serde::{Deserialize, Serialize};

use crate::effect::{
    admit_value, db_to_linear_with_quotient, AudioEffect, EffectError, EffectState, SetOutcome,
};
use crate::iir::{IirFilter, ORDER_BIQUAD};
use crate::params::{self, ParameterMap, ValueChangeKind};
use crate::ring_buffer::SampleRingBuffer;
use crate::AudioSample;

/// The filter kinds of the SoX filter plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    Allpass,
    Band,
    Bandpass,
    Bandreject,
    Bass,
    Biquad,
    Equalizer,
    Highpass,
    Lowpass,
    Treble,
}

impl FilterKind {
    const ALL: [FilterKind; 10] = [
        FilterKind::Allpass,
        FilterKind::Band,
        FilterKind::Bandpass,
        FilterKind::Bandreject,
        FilterKind::Bass,
        FilterKind::Biquad,
        FilterKind::Equalizer,
        FilterKind::Highpass,
        FilterKind::Lowpass,
        FilterKind::Treble,
    ];

    pub fn as_name(self) -> &'static str {
        match self {
            FilterKind::Allpass => "allpass",
            FilterKind::Band => "band",
            FilterKind::Bandpass => "bandpass",
            FilterKind::Bandreject => "bandreject",
            FilterKind::Bass => "bass",
            FilterKind::Biquad => "biquad",
            FilterKind::Equalizer => "equalizer",
            FilterKind::Highpass => "highpass",
            FilterKind::Lowpass => "lowpass",
            FilterKind::Treble => "treble",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_name() == name)
    }

    /// Whether this kind has a dB gain parameter (peaking and shelves).
    fn uses_gain(self) -> bool {
        matches!(
            self,
            FilterKind::Bass | FilterKind::Treble | FilterKind::Equalizer
        )
    }

    /// Whether this kind is a shelving filter (slope bandwidth allowed).
    fn is_shelf(self) -> bool {
        matches!(self, FilterKind::Bass | FilterKind::Treble)
    }
}

/// How the bandwidth parameter is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandwidthUnit {
    Frequency,
    Octaves,
    Quality,
    Butterworth,
    Slope,
}

impl BandwidthUnit {
    pub fn as_name(self) -> &'static str {
        match self {
            BandwidthUnit::Frequency => "Hz",
            BandwidthUnit::Octaves => "Octaves",
            BandwidthUnit::Quality => "Q",
            BandwidthUnit::Butterworth => "Butterworth",
            BandwidthUnit::Slope => "Slope",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            BandwidthUnit::Frequency,
            BandwidthUnit::Octaves,
            BandwidthUnit::Quality,
            BandwidthUnit::Butterworth,
            BandwidthUnit::Slope,
        ]
        .into_iter()
        .find(|unit| unit.as_name() == name)
    }
}

const PARAMETER_NAME_KIND: &str = "Kind";
const PARAMETER_NAME_FREQUENCY: &str = "Frequency [Hz]";
const PARAMETER_NAME_BANDWIDTH: &str = "Bandwidth";
const PARAMETER_NAME_BANDWIDTH_UNIT: &str = "Bandwidth Unit";
const PARAMETER_NAME_GAIN: &str = "Gain [dB]";
const COEFFICIENT_NAMES: [&str; 6] = ["B0", "B1", "B2", "A0", "A1", "A2"];

/// The parameters driving the coefficient formulas.
#[derive(Debug, Clone)]
struct FilterDescriptor {
    kind: FilterKind,
    frequency: f64,
    bandwidth: f64,
    bandwidth_unit: BandwidthUnit,
    db_gain: f64,
    /// Raw coefficients, only read by the `Biquad` kind.
    b: [f64; 3],
    a: [f64; 3],
}

impl FilterDescriptor {
    fn new() -> Self {
        Self {
            kind: FilterKind::Lowpass,
            frequency: 1000.0,
            bandwidth: core::f64::consts::FRAC_1_SQRT_2,
            bandwidth_unit: BandwidthUnit::Quality,
            db_gain: 0.0,
            b: [1.0, 0.0, 0.0],
            a: [1.0, 0.0, 0.0],
        }
    }

    /// Bandwidth converted to a Hz figure (used by the band kind).
    fn bandwidth_in_hz(&self) -> f64 {
        match self.bandwidth_unit {
            BandwidthUnit::Frequency => self.bandwidth,
            BandwidthUnit::Octaves => {
                let octaves = self.bandwidth;
                self.frequency * (Libm::<f64>::pow(2.0, octaves) - 1.0)
                    / Libm::<f64>::pow(2.0, octaves / 2.0)
            }
            BandwidthUnit::Quality => self.frequency / self.bandwidth,
            BandwidthUnit::Butterworth | BandwidthUnit::Slope => {
                self.frequency / core::f64::consts::FRAC_1_SQRT_2
            }
        }
    }

    /// The cookbook `alpha` for the current bandwidth interpretation.
    fn alpha(&self, w0: f64, amplitude: f64) -> f64 {
        let sin_w0 = Libm::<f64>::sin(w0);
        match self.bandwidth_unit {
            BandwidthUnit::Quality => sin_w0 / (2.0 * self.bandwidth),
            BandwidthUnit::Frequency => sin_w0 / (2.0 * self.frequency / self.bandwidth),
            BandwidthUnit::Octaves => {
                let ln2_half = Libm::<f64>::log(2.0) / 2.0;
                sin_w0 * Libm::<f64>::sinh(ln2_half * self.bandwidth * w0 / sin_w0)
            }
            BandwidthUnit::Butterworth => {
                sin_w0 / (2.0 * core::f64::consts::FRAC_1_SQRT_2)
            }
            BandwidthUnit::Slope => {
                let slope_term =
                    (amplitude + 1.0 / amplitude) * (1.0 / self.bandwidth - 1.0) + 2.0;
                sin_w0 / 2.0 * Libm::<f64>::sqrt(slope_term)
            }
        }
    }

    /// Compute `(b, a)` coefficient triples for the current settings.
    fn coefficients(&self, sample_rate: f64) -> ([f64; 3], [f64; 3]) {
        if self.kind == FilterKind::Biquad {
            return (self.b, self.a);
        }
        if self.kind == FilterKind::Band {
            return self.band_coefficients(sample_rate);
        }

        let w0 = TAU * self.frequency / sample_rate;
        let cos_w0 = Libm::<f64>::cos(w0);
        // shelves and the peaking equalizer scale by the square root of
        // the linear gain
        let amplitude = db_to_linear_with_quotient(self.db_gain, 40.0);
        let alpha = self.alpha(w0, amplitude);

        match self.kind {
            FilterKind::Lowpass => (
                [(1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0],
                [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
            ),
            FilterKind::Highpass => (
                [(1.0 + cos_w0) / 2.0, -1.0 - cos_w0, (1.0 + cos_w0) / 2.0],
                [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
            ),
            FilterKind::Bandpass => (
                [alpha, 0.0, -alpha],
                [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
            ),
            FilterKind::Bandreject => (
                [1.0, -2.0 * cos_w0, 1.0],
                [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
            ),
            FilterKind::Allpass => (
                [1.0 - alpha, -2.0 * cos_w0, 1.0 + alpha],
                [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
            ),
            FilterKind::Equalizer => (
                [
                    1.0 + alpha * amplitude,
                    -2.0 * cos_w0,
                    1.0 - alpha * amplitude,
                ],
                [
                    1.0 + alpha / amplitude,
                    -2.0 * cos_w0,
                    1.0 - alpha / amplitude,
                ],
            ),
            FilterKind::Bass => {
                let root = 2.0 * Libm::<f64>::sqrt(amplitude) * alpha;
                (
                    [
                        amplitude * ((amplitude + 1.0) - (amplitude - 1.0) * cos_w0 + root),
                        2.0 * amplitude * ((amplitude - 1.0) - (amplitude + 1.0) * cos_w0),
                        amplitude * ((amplitude + 1.0) - (amplitude - 1.0) * cos_w0 - root),
                    ],
                    [
                        (amplitude + 1.0) + (amplitude - 1.0) * cos_w0 + root,
                        -2.0 * ((amplitude - 1.0) + (amplitude + 1.0) * cos_w0),
                        (amplitude + 1.0) + (amplitude - 1.0) * cos_w0 - root,
                    ],
                )
            }
            FilterKind::Treble => {
                let root = 2.0 * Libm::<f64>::sqrt(amplitude) * alpha;
                (
                    [
                        amplitude * ((amplitude + 1.0) + (amplitude - 1.0) * cos_w0 + root),
                        -2.0 * amplitude * ((amplitude - 1.0) + (amplitude + 1.0) * cos_w0),
                        amplitude * ((amplitude + 1.0) + (amplitude - 1.0) * cos_w0 - root),
                    ],
                    [
                        (amplitude + 1.0) - (amplitude - 1.0) * cos_w0 + root,
                        2.0 * ((amplitude - 1.0) - (amplitude + 1.0) * cos_w0),
                        (amplitude + 1.0) - (amplitude - 1.0) * cos_w0 - root,
                    ],
                )
            }
            FilterKind::Biquad | FilterKind::Band => unreachable!("handled above"),
        }
    }

    /// The SoX `band.c` exponential-pole band filter.
    fn band_coefficients(&self, sample_rate: f64) -> ([f64; 3], [f64; 3]) {
        let w0 = TAU * self.frequency / sample_rate;
        let bandwidth_hz = self.bandwidth_in_hz();
        let a2 = Libm::<f64>::exp(-TAU * bandwidth_hz / sample_rate);
        let a1 = -4.0 * a2 / (1.0 + a2) * Libm::<f64>::cos(w0);
        let b0 = Libm::<f64>::sqrt(1.0 - a1 * a1 / (4.0 * a2)) * (1.0 - a2);
        ([b0, 0.0, 0.0], [1.0, a1, a2])
    }
}

/// The SoX filter effect: one order-3 IIR filter over per-channel ring
/// buffers.
pub struct FilterEffect {
    state: EffectState,
    map: ParameterMap,
    descriptor: FilterDescriptor,
    filter: IirFilter,
    input_buffers: Vec<SampleRingBuffer>,
    output_buffers: Vec<SampleRingBuffer>,
}

impl FilterEffect {
    pub fn new() -> Self {
        let mut effect = Self {
            state: EffectState::new(),
            map: ParameterMap::new(),
            descriptor: FilterDescriptor::new(),
            filter: IirFilter::new(ORDER_BIQUAD),
            input_buffers: Vec::new(),
            output_buffers: Vec::new(),
        };
        effect.initialize_parameters(FilterKind::Lowpass);
        effect.set_default_values();
        effect
    }

    /// Rebuild the parameter map for `kind`; the parameter set is
    /// kind-dependent.
    fn initialize_parameters(&mut self, kind: FilterKind) {
        self.map.clear();
        let kind_names: Vec<&str> = FilterKind::ALL.iter().map(|k| k.as_name()).collect();
        self.map
            .set_kind_and_value_enum(PARAMETER_NAME_KIND, &kind_names, kind.as_name());

        if kind == FilterKind::Biquad {
            for name in COEFFICIENT_NAMES {
                self.map.set_kind_real(name, -100.0, 100.0, 0.000001);
            }
        } else {
            self.map
                .set_kind_real(PARAMETER_NAME_FREQUENCY, 10.0, 25000.0, 0.1);
            self.map
                .set_kind_real(PARAMETER_NAME_BANDWIDTH, 0.001, 20000.0, 0.001);
            let units: Vec<&str> = if kind.is_shelf() {
                vec!["Hz", "Octaves", "Q", "Butterworth", "Slope"]
            } else {
                vec!["Hz", "Octaves", "Q", "Butterworth"]
            };
            self.map
                .set_kind_enum(PARAMETER_NAME_BANDWIDTH_UNIT, &units);
            if kind.uses_gain() {
                self.map
                    .set_kind_real(PARAMETER_NAME_GAIN, -25.0, 25.0, 0.01);
            }
        }

        self.descriptor.kind = kind;
    }

    /// Push the current descriptor into the IIR filter.
    fn update_settings(&mut self) {
        let (b, a) = self.descriptor.coefficients(self.state.sample_rate);
        self.filter.set_order3(b[0], b[1], b[2], a[0], a[1], a[2]);
        for buffer in &mut self.input_buffers {
            buffer.zero();
        }
        for buffer in &mut self.output_buffers {
            buffer.zero();
        }
    }

    fn resize_buffers(&mut self, channel_count: usize) {
        self.input_buffers = (0..channel_count)
            .map(|_| SampleRingBuffer::new(ORDER_BIQUAD))
            .collect();
        self.output_buffers = (0..channel_count)
            .map(|_| SampleRingBuffer::new(ORDER_BIQUAD))
            .collect();
    }

    fn apply_parameter(&mut self, name: &str, value: &str) {
        let descriptor = &mut self.descriptor;
        match name {
            PARAMETER_NAME_FREQUENCY => descriptor.frequency = params::to_real(value),
            PARAMETER_NAME_BANDWIDTH => descriptor.bandwidth = params::to_real(value),
            PARAMETER_NAME_BANDWIDTH_UNIT => {
                if let Some(unit) = BandwidthUnit::from_name(value) {
                    descriptor.bandwidth_unit = unit;
                }
            }
            PARAMETER_NAME_GAIN => descriptor.db_gain = params::to_real(value),
            _ => {
                if let Some(position) = COEFFICIENT_NAMES.iter().position(|n| *n == name) {
                    let numeric = params::to_real(value);
                    if position < 3 {
                        descriptor.b[position] = numeric;
                    } else {
                        descriptor.a[position - 3] = numeric;
                    }
                }
            }
        }
    }
}

impl Default for FilterEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEffect for FilterEffect {
    fn name(&self) -> &'static str {
        "SoX Filter"
    }

    fn parameter_map(&self) -> &ParameterMap {
        &self.map
    }

    fn parameter_map_mut(&mut self) -> &mut ParameterMap {
        &mut self.map
    }

    fn set_default_values(&mut self) {
        let kind = self.descriptor.kind;
        if kind == FilterKind::Biquad {
            // identity filter
            for (name, value) in COEFFICIENT_NAMES
                .iter()
                .zip(["1", "0", "0", "1", "0", "0"])
            {
                self.set_value(name, value, true);
            }
        } else {
            self.set_value(PARAMETER_NAME_FREQUENCY, "1000", true);
            self.set_value(PARAMETER_NAME_BANDWIDTH, "0.7071", true);
            self.set_value(PARAMETER_NAME_BANDWIDTH_UNIT, "Q", true);
            if kind.uses_gain() {
                self.set_value(PARAMETER_NAME_GAIN, "0", true);
            }
        }
        self.update_settings();
    }

    fn prepare(&mut self, sample_rate: f64) -> Result<(), EffectError> {
        self.state.prepare(sample_rate)?;
        self.update_settings();
        Ok(())
    }

    fn release(&mut self) {
        self.state.release();
    }

    fn process(&mut self, time_position: f64, buffer: &mut [Vec<AudioSample>]) {
        self.state.begin_block(time_position, buffer.len());

        if self.input_buffers.len() != buffer.len() {
            self.resize_buffers(buffer.len());
        }

        for (channel, samples) in buffer.iter_mut().enumerate() {
            let input = &mut self.input_buffers[channel];
            let output = &mut self.output_buffers[channel];

            for sample in samples.iter_mut() {
                input.shift_right(*sample);
                output.shift_right(0.0);
                self.filter.apply(input, output);
                *sample = output.first();
            }
        }
    }

    fn set_value(&mut self, name: &str, value: &str, suppress_recalc: bool) -> ValueChangeKind {
        match admit_value(&mut self.map, name, value) {
            SetOutcome::Unchanged | SetOutcome::Refused => ValueChangeKind::NoChange,
            SetOutcome::Stored => {
                if name == PARAMETER_NAME_KIND {
                    let kind = FilterKind::from_name(value).unwrap_or(FilterKind::Lowpass);
                    self.initialize_parameters(kind);
                    self.set_default_values();
                    ValueChangeKind::GlobalChange
                } else {
                    self.apply_parameter(name, value);
                    if !suppress_recalc {
                        self.update_settings();
                    }
                    ValueChangeKind::ParameterChange
                }
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

    fn prepared(kind: FilterKind) -> FilterEffect {
        let mut effect = FilterEffect::new();
        effect.prepare(44100.0).unwrap();
        if kind != FilterKind::Lowpass {
            assert_eq!(
                effect.set_value("Kind", kind.as_name(), false),
                ValueChangeKind::GlobalChange
            );
        }
        effect
    }

    /// Settle the filter on a DC input and return the final value.
    fn settle_dc(effect: &mut FilterEffect, level: AudioSample) -> AudioSample {
        let mut last = 0.0;
        for _ in 0..50 {
            let mut buffer = vec![vec![level; 256]];
            effect.process(0.0, &mut buffer);
            last = buffer[0][255];
        }
        last
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut effect = prepared(FilterKind::Lowpass);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut effect = prepared(FilterKind::Highpass);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bass_shelf_boosts_dc() {
        let mut effect = prepared(FilterKind::Bass);
        effect.set_value("Gain [dB]", "6", false);
        let expected = 0.5 * db_to_linear_with_quotient(6.0, 20.0);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), expected, epsilon = 1e-4);
    }

    #[test]
    fn test_bandpass_blocks_dc() {
        let mut effect = prepared(FilterKind::Bandpass);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bandreject_passes_dc() {
        let mut effect = prepared(FilterKind::Bandreject);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_equalizer_leaves_dc_untouched() {
        // a peaking boost at 1 kHz has exactly unit gain at DC
        let mut effect = prepared(FilterKind::Equalizer);
        effect.set_value("Gain [dB]", "12", false);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_treble_shelf_leaves_dc_untouched() {
        let mut effect = prepared(FilterKind::Treble);
        effect.set_value("Gain [dB]", "6", false);
        assert_abs_diff_eq!(settle_dc(&mut effect, 0.5), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_bandwidth_units_give_matching_alpha() {
        // Q 0.7071 and the Butterworth unit describe the same filter
        let mut by_quality = prepared(FilterKind::Lowpass);
        by_quality.set_value("Bandwidth", "0.70710678", false);

        let mut butterworth = prepared(FilterKind::Lowpass);
        butterworth.set_value("Bandwidth Unit", "Butterworth", false);

        let mut first = vec![vec![0.0; 256]];
        first[0][0] = 1.0;
        by_quality.process(0.0, &mut first);

        let mut second = vec![vec![0.0; 256]];
        second[0][0] = 1.0;
        butterworth.process(0.0, &mut second);

        for i in 0..256 {
            assert_abs_diff_eq!(first[0][i], second[0][i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_biquad_identity_passthrough() {
        let mut effect = prepared(FilterKind::Biquad);
        let mut buffer = vec![vec![0.25; 64], vec![-0.25; 64]];
        effect.process(0.0, &mut buffer);
        for i in 0..64 {
            assert_abs_diff_eq!(buffer[0][i], 0.25, epsilon = 1e-12);
            assert_abs_diff_eq!(buffer[1][i], -0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_kind_switch_rebuilds_parameters() {
        let mut effect = prepared(FilterKind::Equalizer);
        assert!(effect.parameter_map().contains("Gain [dB]"));
        effect.set_value("Kind", "bandpass", false);
        assert!(!effect.parameter_map().contains("Gain [dB]"));
        assert!(effect.parameter_map().contains("Frequency [Hz]"));
    }

    #[test]
    fn test_band_filter_is_stable() {
        let mut effect = prepared(FilterKind::Band);
        effect.set_value("Bandwidth Unit", "Hz", false);
        effect.set_value("Bandwidth", "500", false);

        let mut buffer = vec![vec![0.0; 4096]];
        buffer[0][0] = 1.0;
        effect.process(0.0, &mut buffer);

        let tail: f64 = buffer[0][3900..].iter().map(|s| s.abs()).sum();
        assert!(tail < 1e-3, "band impulse response must decay, got {}", tail);
    }

    #[test]
    fn test_allpass_preserves_energy_of_sine() {
        let mut effect = prepared(FilterKind::Allpass);
        let mut buffer = vec![Vec::with_capacity(8192)];
        for i in 0..8192 {
            buffer[0].push(Libm::<f64>::sin(TAU * 441.0 * i as f64 / 44100.0));
        }
        let input_energy: f64 = buffer[0].iter().map(|s| s * s).sum();
        effect.process(0.0, &mut buffer);
        let output_energy: f64 = buffer[0][1024..].iter().map(|s| s * s).sum();
        let reference: f64 = input_energy * (8192.0 - 1024.0) / 8192.0;
        assert!((output_energy - reference).abs() / reference < 0.02);
    }
}
