//! Multiband Compander
//!
//! The SoX `compand`/`mcompand` effects: an envelope follower driving a
//! piecewise transfer function with rounded knees, behind a tree of
//! Linkwitz-Riley 4th-order crossovers. A simple compander is a multiband
//! compander with a single band.
//!
//! The crossover tree shares its ring buffers along a chain: band `k`
//! writes its high-frequency residue into the buffer band `k+1` reads as
//! input. The buffers live in one [`SampleRingBufferMatrix`] and bands
//! address them by slot index.
//!
//! After SoX `compandt.c` (Rob Sewell), `compand.c` (Chris Bagwell, Nick
//! Bailey), `mcompand_xover.h` (Rob Sewell) and `mcompand.c` (Daniel
//! Pouzzner).

use core::f64::consts::{FRAC_1_SQRT_2, LN_10, TAU};

use libm::Libm;

use crate::effect::{admit_value, AudioEffect, EffectError, EffectState, SetOutcome};
use crate::iir::{IirFilter, ORDER_LINKWITZ_RILEY};
use crate::params::{self, ParameterMap, ValueChangeKind};
use crate::ring_buffer::{SampleRingBuffer, SampleRingBufferMatrix};
use crate::AudioSample;

/// Maximum number of bands in the multiband compander.
pub const MAXIMUM_BAND_COUNT: usize = 10;

/// Maximum crossover top frequency; the top band is unbounded and acts
/// as if its crossover sat at or above Nyquist.
const MAXIMUM_TOP_FREQUENCY: f64 = 25000.0;

/// Offset of the left transfer-function anchor below the threshold, in
/// decibels.
const LEFT_DB_OFFSET: f64 = 10.0;

/*====================*/
/* transfer function  */
/*====================*/

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Point2D {
    x: f64,
    y: f64,
}

impl Point2D {
    fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn add(&mut self, other: Point2D) {
        self.x += other.x;
        self.y += other.y;
    }

    fn subtract(&mut self, other: Point2D) {
        self.x -= other.x;
        self.y -= other.y;
    }

    fn scale(&mut self, factor: f64) {
        self.x *= factor;
        self.y *= factor;
    }

    fn distance(&self, other: Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        Libm::<f64>::sqrt(dx * dx + dy * dy)
    }
}

/// One segment of a compander transfer function, either a straight line
/// or a quadratic across the knee, with coefficients `(a1, a2)` such
/// that `y(x) = y_start + d·(a2·d + a1)` for `d = x − x_start`.
#[derive(Debug, Clone, Default)]
struct TransferSegment {
    is_straight_line: bool,
    start_point: Point2D,
    end_point: Point2D,
    a1: f64,
    a2: f64,
}

impl TransferSegment {
    fn domain_contains(&self, x: f64) -> bool {
        self.start_point.x <= x && x <= self.end_point.x
    }

    fn gradient(&self) -> f64 {
        (self.end_point.y - self.start_point.y) / (self.end_point.x - self.start_point.x)
    }

    fn length(&self) -> f64 {
        self.start_point.distance(self.end_point)
    }

    /// Fit the quadratic so it passes through start, end and `point`.
    fn adapt_coefficients(&mut self, point: Point2D) {
        if self.length() == 0.0 {
            self.a1 = 0.0;
            self.a2 = 0.0;
        } else {
            let in_a = point.x - self.start_point.x;
            let out_a = point.y - self.start_point.y;
            let in_b = self.end_point.x - self.start_point.x;
            let out_b = self.end_point.y - self.start_point.y;
            self.a2 = (out_b / in_b - out_a / in_a) / (in_b - in_a);
            self.a1 = out_a / in_a - self.a2 * in_a;
        }
    }

    /// Point at arc-length `position` along the segment.
    fn interpolate(&self, position: f64) -> Point2D {
        let segment_length = self.length();
        let relative_position = if segment_length == 0.0 {
            0.0
        } else {
            position / segment_length
        };

        let mut result = self.end_point;
        result.subtract(self.start_point);
        result.scale(relative_position);
        result.add(self.start_point);
        result
    }
}

/// The compander transfer function: three segments around the threshold
/// point, operating on natural logarithms of the envelope volume. The
/// applied result is the amplification factor for the current sample.
#[derive(Debug, Clone)]
pub struct TransferFunction {
    segments: [TransferSegment; 3],
    minimum_linear_in_value: f64,
    minimum_linear_out_value: f64,
    db_gain: f64,
    db_knee: f64,
}

impl TransferFunction {
    pub fn new() -> Self {
        Self {
            segments: Default::default(),
            minimum_linear_in_value: 1.0,
            minimum_linear_out_value: 1.0,
            db_gain: 0.0,
            db_knee: 0.01,
        }
    }

    /// Lay out the transfer function for a compander with the given knee
    /// width, threshold, compression ratio and output gain (dB-domain
    /// inputs; the stored segments end up in the ln-domain).
    pub fn adapt(&mut self, db_knee: f64, db_threshold: f64, ratio: f64, db_gain: f64) {
        let ratio = ratio.max(1.0);
        let db_threshold = db_threshold.min(0.0);
        self.db_knee = db_knee.max(0.0);
        self.db_gain = db_gain;

        // anchors of the two straight segments around the threshold
        self.segments[0].start_point = Point2D::new(db_threshold - LEFT_DB_OFFSET, 0.0);
        self.segments[2].start_point = Point2D::new(db_threshold, 0.0);
        self.segments[2].end_point = Point2D::new(0.0, (ratio - 1.0) * db_threshold / ratio);

        self.update_segments();

        self.minimum_linear_in_value = Libm::<f64>::exp(self.segments[1].start_point.x);
        self.minimum_linear_out_value = Libm::<f64>::exp(self.segments[1].start_point.y);
    }

    fn update_segments(&mut self) {
        // pass 1: segment kinds; the curve inherits its start from the
        // straight segment after it
        for index in (0..3).rev() {
            let is_straight_line = index % 2 == 0;
            self.segments[index].is_straight_line = is_straight_line;
            if !is_straight_line && index + 1 < 3 {
                self.segments[index].start_point = self.segments[index + 1].start_point;
            }
        }

        // pass 2: each segment ends where its successor starts
        for index in 0..2 {
            self.segments[index].end_point = self.segments[index + 1].start_point;
        }

        // pass 3: shift by the output gain, then scale the dB values
        // into the ln-domain; straight lines get their gradient
        let factor = LN_10 / 20.0;
        for segment in &mut self.segments {
            segment.start_point.y += self.db_gain;
            segment.end_point.y += self.db_gain;
            segment.start_point.scale(factor);
            segment.end_point.scale(factor);
            if segment.is_straight_line {
                segment.a2 = 0.0;
                segment.a1 = segment.gradient();
            }
        }

        // pass 4: round the knee with the middle (curve) segment
        self.adapt_curve();
    }

    fn adapt_curve(&mut self) {
        let radius = self.db_knee * LN_10 / 20.0;
        let original_corner = self.segments[2].start_point;

        // move the curve start back along the lower straight segment
        let length = self.segments[0].length();
        let position = (length - radius).max(0.0);
        let curve_start = self.segments[0].interpolate(position);
        self.segments[1].start_point = curve_start;
        self.segments[0].end_point = curve_start;

        // and the curve end forward along the upper one
        let length = self.segments[2].length();
        let position = radius.min(length / 2.0);
        let curve_end = self.segments[2].interpolate(position);
        self.segments[1].end_point = curve_end;
        self.segments[2].start_point = curve_end;

        // the quadratic passes through the centroid of curve start,
        // curve end and the original corner point
        let mut intermediate = curve_start;
        intermediate.add(curve_end);
        intermediate.add(original_corner);
        intermediate.scale(1.0 / 3.0);
        self.segments[1].adapt_coefficients(intermediate);
    }

    /// The amplification factor for an envelope volume `value`.
    pub fn apply(&self, value: f64) -> f64 {
        if value <= self.minimum_linear_in_value {
            return self.minimum_linear_out_value;
        }

        let value = value.min(1.0);
        let ln_value = Libm::<f64>::log(value);

        for segment in &self.segments {
            if segment.domain_contains(ln_value) {
                let delta = ln_value - segment.start_point.x;
                let ln_result =
                    segment.start_point.y + delta * (segment.a2 * delta + segment.a1);
                return Libm::<f64>::exp(ln_result);
            }
        }

        value
    }

    /// Envelope volumes at or below this input clamp to the minimum
    /// output.
    pub fn minimum_linear_in(&self) -> f64 {
        self.minimum_linear_in_value
    }

    pub fn minimum_linear_out(&self) -> f64 {
        self.minimum_linear_out_value
    }
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self::new()
    }
}

/*====================*/
/* compander          */
/*====================*/

/// A single-band compander over several channels: envelope integration
/// per channel plus the transfer function. By default the channels are
/// aggregated (stereo-linked) through the max-abs sample across
/// channels; per-channel following is supported as well.
#[derive(Debug, Clone)]
pub struct Compander {
    transfer_function: TransferFunction,
    channels_are_aggregated: bool,
    attack_delta_list: Vec<f64>,
    release_delta_list: Vec<f64>,
    volume_list: Vec<f64>,
}

impl Compander {
    pub fn new() -> Self {
        Self {
            transfer_function: TransferFunction::new(),
            channels_are_aggregated: true,
            attack_delta_list: Vec::new(),
            release_delta_list: Vec::new(),
            volume_list: Vec::new(),
        }
    }

    /// Per-sample integration factor for an envelope time of `t` seconds.
    fn adapt_envelope_time(t: f64, sample_rate: f64) -> f64 {
        (1.0 - Libm::<f64>::exp(-1.0 / (sample_rate * t))).min(1.0)
    }

    /// Configure transfer function and envelope deltas.
    #[allow(clippy::too_many_arguments)]
    pub fn adapt(
        &mut self,
        sample_rate: f64,
        attack: f64,
        release: f64,
        db_knee: f64,
        db_threshold: f64,
        ratio: f64,
        db_gain: f64,
    ) {
        self.transfer_function
            .adapt(db_knee, db_threshold, ratio, db_gain);
        self.channels_are_aggregated = true;
        self.volume_list.fill(1.0);
        let attack_delta = Self::adapt_envelope_time(attack, sample_rate);
        self.attack_delta_list.fill(attack_delta);
        let release_delta = Self::adapt_envelope_time(release, sample_rate);
        self.release_delta_list.fill(release_delta);
    }

    pub fn set_channel_count(&mut self, channel_count: usize) {
        self.volume_list.resize(channel_count, 1.0);
        self.attack_delta_list.resize(channel_count, 0.0);
        self.release_delta_list.resize(channel_count, 0.0);
    }

    /// Integrate the envelope toward `input_volume`: attack when the
    /// delta is positive, release otherwise.
    fn integrate_volume(&mut self, channel: usize, input_volume: f64) {
        let mut volume = self.volume_list[channel];
        let delta = input_volume - volume;
        let increment = if delta > 0.0 {
            self.attack_delta_list[channel]
        } else {
            self.release_delta_list[channel]
        };
        volume += delta * increment;

        if self.channels_are_aggregated {
            self.volume_list.fill(volume);
        } else {
            self.volume_list[channel] = volume;
        }
    }

    fn maximum_absolute_sample(samples: &[AudioSample]) -> AudioSample {
        samples.iter().fold(0.0, |result, value| {
            let magnitude = value.abs();
            if magnitude > result {
                magnitude
            } else {
                result
            }
        })
    }

    /// Compand one frame: update the envelope, then scale every channel
    /// by the transfer function of its volume. With `output_is_summed`
    /// the result is added onto `output_samples` (used when several
    /// bands write into one output frame).
    pub fn apply(
        &mut self,
        input_samples: &[AudioSample],
        output_samples: &mut [AudioSample],
        output_is_summed: bool,
    ) {
        let channel_count = input_samples.len();

        if self.channels_are_aggregated {
            // the first channel's envelope represents all of them
            let maximum_sample = Self::maximum_absolute_sample(input_samples);
            self.integrate_volume(0, maximum_sample);
        } else {
            for channel in 0..channel_count {
                self.integrate_volume(channel, input_samples[channel]);
            }
        }

        for channel in 0..channel_count {
            let amplification = self.transfer_function.apply(self.volume_list[channel]);
            let mut output_sample = input_samples[channel] * amplification;
            if output_is_summed {
                output_sample += output_samples[channel];
            }
            output_samples[channel] = output_sample;
        }
    }
}

impl Default for Compander {
    fn default() -> Self {
        Self::new()
    }
}

/*====================*/
/* crossover          */
/*====================*/

/// Square a biquad coefficient triple into the 5-tap polynomial of the
/// biquad-squared (Linkwitz-Riley) form.
fn squared_coefficients(triple: [f64; 3]) -> [f64; 5] {
    [
        triple[0] * triple[0],
        2.0 * triple[0] * triple[1],
        2.0 * triple[0] * triple[2] + triple[1] * triple[1],
        2.0 * triple[1] * triple[2],
        triple[2] * triple[2],
    ]
}

/// A Linkwitz-Riley 4th-order crossover: complementary lowpass and
/// highpass sharing one cutoff, each realized as a squared Butterworth
/// biquad in a single order-5 IIR filter.
#[derive(Debug, Clone)]
struct LrCrossoverFilter {
    lowpass_filter: IirFilter,
    highpass_filter: IirFilter,
}

impl LrCrossoverFilter {
    fn new() -> Self {
        let mut filter = Self {
            lowpass_filter: IirFilter::new(ORDER_LINKWITZ_RILEY),
            highpass_filter: IirFilter::new(ORDER_LINKWITZ_RILEY),
        };
        filter.set_to_identity();
        filter
    }

    /// Identity lowpass, rejecting highpass; used by the top band.
    fn set_to_identity(&mut self) {
        self.lowpass_filter.set_unit(1.0);
        self.highpass_filter.set_unit(0.0);
    }

    /// Configure the crossover for `frequency`; at or above Nyquist it
    /// degenerates to the identity.
    fn adapt(&mut self, frequency: f64, sample_rate: f64) {
        if frequency >= sample_rate / 2.0 {
            self.set_to_identity();
            return;
        }

        let w0 = TAU * frequency / sample_rate;
        let alpha = Libm::<f64>::sin(w0) / (2.0 * FRAC_1_SQRT_2);
        let cos_w0 = Libm::<f64>::cos(w0);

        // biquad lowpass numerator, highpass numerator, shared
        // denominator, all normalized by a0
        let mut lowpass_numerator = [(1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0];
        let mut highpass_numerator =
            [(1.0 + cos_w0) / 2.0, -1.0 - cos_w0, (1.0 + cos_w0) / 2.0];
        let mut denominator = [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha];

        let reference_value = 1.0 / denominator[0];
        for coefficient in lowpass_numerator
            .iter_mut()
            .chain(highpass_numerator.iter_mut())
            .chain(denominator.iter_mut())
        {
            *coefficient *= reference_value;
        }

        self.lowpass_filter.set_order5(
            squared_coefficients(lowpass_numerator),
            squared_coefficients(denominator),
        );
        self.highpass_filter.set_order5(
            squared_coefficients(highpass_numerator),
            squared_coefficients(denominator),
        );
    }

    /// Split the input into its low and high parts; both filters run in
    /// parallel on the same input ring.
    #[inline]
    fn apply(
        &self,
        input_buffer: &SampleRingBuffer,
        output_buffer_low: &mut SampleRingBuffer,
        output_buffer_high: &mut SampleRingBuffer,
    ) {
        self.lowpass_filter.apply(input_buffer, output_buffer_low);
        self.highpass_filter.apply(input_buffer, output_buffer_high);
    }
}

/*====================*/
/* multiband          */
/*====================*/

/// One band of the multiband compander: a compander plus the crossover
/// that splits this band's input into its own range (low) and the
/// residue passed to the next band (high).
#[derive(Debug, Clone)]
struct CompanderBand {
    channel_count: usize,
    compander: Compander,
    top_frequency: f64,
    crossover_filter: LrCrossoverFilter,
    input_sample_list: Vec<AudioSample>,
}

impl CompanderBand {
    fn new() -> Self {
        Self {
            channel_count: 0,
            compander: Compander::new(),
            top_frequency: MAXIMUM_TOP_FREQUENCY,
            crossover_filter: LrCrossoverFilter::new(),
            input_sample_list: Vec::new(),
        }
    }

    fn set_channel_count(&mut self, channel_count: usize) {
        self.channel_count = channel_count;
        self.compander.set_channel_count(channel_count);
        self.input_sample_list.resize(channel_count, 0.0);
    }

    #[allow(clippy::too_many_arguments)]
    fn adapt(
        &mut self,
        sample_rate: f64,
        attack: f64,
        release: f64,
        db_knee: f64,
        db_threshold: f64,
        ratio: f64,
        db_gain: f64,
        top_frequency: f64,
    ) {
        self.compander.adapt(
            sample_rate,
            attack,
            release,
            db_knee,
            db_threshold,
            ratio,
            db_gain,
        );
        self.crossover_filter.adapt(top_frequency, sample_rate);
        self.top_frequency = top_frequency;
    }

    /// Run the crossover for every channel of this band: slot `2k` in
    /// the matrix is the band input, `2k+1` the low output, `2k+2` the
    /// high output (and the next band's input).
    fn calculate_crossover(&self, matrix: &mut SampleRingBufferMatrix, base_slot: usize) {
        for channel in 0..self.channel_count {
            let (input_buffer, output_low, output_high) =
                matrix.crossover_triple(channel, base_slot);
            self.crossover_filter
                .apply(input_buffer, output_low, output_high);
        }
    }

    /// Compand this band's low output and sum it into the output frame.
    fn apply(
        &mut self,
        matrix: &SampleRingBufferMatrix,
        base_slot: usize,
        output_samples: &mut [AudioSample],
    ) {
        for channel in 0..self.channel_count {
            self.input_sample_list[channel] = matrix.at(channel, base_slot + 1).first();
        }
        self.compander
            .apply(&self.input_sample_list, output_samples, true);
    }
}

/// The multiband compander: a list of bands chained through the shared
/// ring-buffer matrix (`2·allocated + 1` slots per channel; the last
/// slot holds the summed output for diagnostics).
#[derive(Debug, Clone)]
pub struct MultibandCompander {
    allocated_band_count: usize,
    band_count: usize,
    channel_count: usize,
    bands: Vec<CompanderBand>,
    matrix: SampleRingBufferMatrix,
}

impl MultibandCompander {
    pub fn new() -> Self {
        Self {
            allocated_band_count: 0,
            band_count: 0,
            channel_count: 0,
            bands: Vec::new(),
            matrix: SampleRingBufferMatrix::new(),
        }
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    /// Allocate `band_count` bands over `channel_count` channels and wire
    /// the crossover chain through the buffer matrix.
    pub fn resize(&mut self, band_count: usize, channel_count: usize) {
        self.allocated_band_count = band_count;
        self.band_count = self.band_count.min(band_count).max(1);
        self.channel_count = channel_count;

        self.bands.resize_with(band_count, CompanderBand::new);
        for band in &mut self.bands {
            band.set_channel_count(channel_count);
        }

        let slot_count = band_count * 2 + 1;
        self.matrix
            .resize(channel_count, slot_count, ORDER_LINKWITZ_RILEY);
    }

    /// Set the live band count without reallocating.
    pub fn set_effective_size(&mut self, band_count: usize) {
        self.band_count = band_count.clamp(1, self.allocated_band_count.max(1));
    }

    /// Reconfigure band `band_index` from compander parameters plus its
    /// crossover top frequency.
    #[allow(clippy::too_many_arguments)]
    pub fn set_band_data(
        &mut self,
        band_index: usize,
        sample_rate: f64,
        attack: f64,
        release: f64,
        db_knee: f64,
        db_threshold: f64,
        ratio: f64,
        db_gain: f64,
        top_frequency: f64,
    ) {
        self.bands[band_index].adapt(
            sample_rate,
            attack,
            release,
            db_knee,
            db_threshold,
            ratio,
            db_gain,
            top_frequency,
        );
    }

    /// Process one frame. Band order is fixed: all crossovers run in
    /// ascending band order before any band compander, then the band
    /// companders sum into the output in ascending order.
    pub fn apply(&mut self, input_samples: &[AudioSample], output_samples: &mut [AudioSample]) {
        output_samples.fill(0.0);
        let slot_count = self.band_count * 2 + 1;

        for channel in 0..self.channel_count {
            // rotate all live buffers one step and seed the chain input
            for slot in 0..slot_count {
                self.matrix.at_mut(channel, slot).shift_right(0.0);
            }
            self.matrix
                .at_mut(channel, 0)
                .set_first(input_samples[channel]);
        }

        for band_index in 0..self.band_count {
            self.bands[band_index].calculate_crossover(&mut self.matrix, band_index * 2);
        }

        for band_index in 0..self.band_count {
            let band = &mut self.bands[band_index];
            band.apply(&self.matrix, band_index * 2, output_samples);
        }

        for channel in 0..self.channel_count {
            self.matrix
                .at_mut(channel, slot_count - 1)
                .set_first(output_samples[channel]);
        }
    }
}

impl Default for MultibandCompander {
    fn default() -> Self {
        Self::new()
    }
}

/*====================*/
/* effect             */
/*====================*/

/// Per-band user parameters as stored in the parameter map.
#[derive(Debug, Clone, Copy)]
struct CompanderBandParameters {
    attack: f64,
    decay: f64,
    db_knee: f64,
    db_threshold: f64,
    ratio: f64,
    db_gain: f64,
    top_frequency: f64,
}

impl Default for CompanderBandParameters {
    fn default() -> Self {
        Self {
            attack: 0.02,
            decay: 0.15,
            db_knee: 6.0,
            db_threshold: -20.0,
            ratio: 2.0,
            db_gain: 5.0,
            top_frequency: MAXIMUM_TOP_FREQUENCY,
        }
    }
}

const PARAMETER_NAME_BAND_COUNT: &str = "Band Count";
const PARAMETER_NAME_BAND_INDEX: &str = "Band Index";
const PARAMETER_NAME_ATTACK: &str = "Attack [s]";
const PARAMETER_NAME_DECAY: &str = "Decay [s]";
const PARAMETER_NAME_KNEE: &str = "Knee [dB]";
const PARAMETER_NAME_THRESHOLD: &str = "Threshold [dB]";
const PARAMETER_NAME_RATIO: &str = "Ratio";
const PARAMETER_NAME_GAIN: &str = "Gain [dB]";
const PARAMETER_NAME_TOP_FREQUENCY: &str = "Top Frequency [Hz]";

/// The SoX compander effect: up to ten bands exposed through parameter
/// pages (`k#…`), with the band count and band index as the page-count
/// and page selectors.
pub struct CompanderEffect {
    state: EffectState,
    map: ParameterMap,
    band_count: usize,
    compander: MultibandCompander,
    band_parameters: [CompanderBandParameters; MAXIMUM_BAND_COUNT],
    input_frame: Vec<AudioSample>,
    output_frame: Vec<AudioSample>,
}

impl CompanderEffect {
    pub fn new() -> Self {
        let mut map = ParameterMap::new();
        map.set_kind_int(
            &format!("-2#{}", PARAMETER_NAME_BAND_COUNT),
            1,
            MAXIMUM_BAND_COUNT as i64,
            1,
        );
        map.set_kind_int(
            &format!("-1#{}", PARAMETER_NAME_BAND_INDEX),
            1,
            MAXIMUM_BAND_COUNT as i64,
            1,
        );

        for band_index in 0..MAXIMUM_BAND_COUNT {
            let page = (band_index + 1) as i32;
            let paged = |name: &str| ParameterMap::paged_parameter_name(name, page);
            map.set_kind_real(&paged(PARAMETER_NAME_ATTACK), 0.001, 1.0, 0.001);
            map.set_kind_real(&paged(PARAMETER_NAME_DECAY), 0.001, 1.0, 0.001);
            map.set_kind_real(&paged(PARAMETER_NAME_KNEE), 0.0, 20.0, 0.01);
            map.set_kind_real(&paged(PARAMETER_NAME_THRESHOLD), -128.0, 0.0, 0.1);
            map.set_kind_real(&paged(PARAMETER_NAME_RATIO), 0.001, 1000.0, 0.001);
            map.set_kind_real(&paged(PARAMETER_NAME_GAIN), -20.0, 20.0, 0.01);
            map.set_kind_real(
                &paged(PARAMETER_NAME_TOP_FREQUENCY),
                0.0,
                MAXIMUM_TOP_FREQUENCY,
                1.0,
            );
        }

        let mut effect = Self {
            state: EffectState::new(),
            map,
            band_count: 1,
            compander: MultibandCompander::new(),
            band_parameters: [CompanderBandParameters::default(); MAXIMUM_BAND_COUNT],
            input_frame: Vec::new(),
            output_frame: Vec::new(),
        };
        effect.set_default_values();
        effect
            .map
            .change_activeness_by_page(effect.band_count as i32);
        effect
    }

    /// Rebuild the multiband structure from the stored band parameters.
    /// The top band's crossover is forced to the maximum top frequency
    /// (at or above Nyquist, i.e. an identity split); its stored value
    /// is kept for serialization.
    fn update_settings(&mut self, channel_count: usize) {
        let sample_rate = self.state.sample_rate;
        self.compander.resize(MAXIMUM_BAND_COUNT, channel_count);
        self.compander.set_effective_size(self.band_count);

        for band_index in 0..MAXIMUM_BAND_COUNT {
            let data = self.band_parameters[band_index];
            let is_unbounded = band_index + 1 >= self.band_count;
            let top_frequency = if is_unbounded {
                MAXIMUM_TOP_FREQUENCY
            } else {
                data.top_frequency
            };
            self.compander.set_band_data(
                band_index,
                sample_rate,
                data.attack,
                data.decay,
                data.db_knee,
                data.db_threshold,
                data.ratio,
                data.db_gain,
                top_frequency,
            );
        }

        self.input_frame = vec![0.0; channel_count];
        self.output_frame = vec![0.0; channel_count];
        log::debug!(
            "compander settings: bands = {}, channels = {}, sample rate = {}",
            self.band_count,
            channel_count,
            sample_rate
        );
    }

    fn channel_count(&self) -> usize {
        self.input_frame.len()
    }
}

impl Default for CompanderEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEffect for CompanderEffect {
    fn name(&self) -> &'static str {
        "SoX Compander"
    }

    fn parameter_map(&self) -> &ParameterMap {
        &self.map
    }

    fn parameter_map_mut(&mut self) -> &mut ParameterMap {
        &mut self.map
    }

    fn set_default_values(&mut self) {
        self.map.set_value(PARAMETER_NAME_BAND_COUNT, "1");
        self.map.set_value(PARAMETER_NAME_BAND_INDEX, "1");

        for band_index in 0..MAXIMUM_BAND_COUNT {
            let page = (band_index + 1) as i32;
            let paged = |name: &str| ParameterMap::paged_parameter_name(name, page);
            self.map.set_value(&paged(PARAMETER_NAME_ATTACK), "0.02");
            self.map.set_value(&paged(PARAMETER_NAME_DECAY), "0.15");
            self.map.set_value(&paged(PARAMETER_NAME_KNEE), "6");
            self.map.set_value(&paged(PARAMETER_NAME_THRESHOLD), "-20");
            self.map.set_value(&paged(PARAMETER_NAME_RATIO), "2");
            self.map.set_value(&paged(PARAMETER_NAME_GAIN), "5");
            let top_frequency =
                MAXIMUM_TOP_FREQUENCY * (band_index + 1) as f64 / MAXIMUM_BAND_COUNT as f64;
            self.map.set_value(
                &paged(PARAMETER_NAME_TOP_FREQUENCY),
                &format!("{}", top_frequency),
            );
            self.band_parameters[band_index] = CompanderBandParameters {
                top_frequency,
                ..CompanderBandParameters::default()
            };
        }

        self.band_count = 1;
        self.update_settings(2);
    }

    fn prepare(&mut self, sample_rate: f64) -> Result<(), EffectError> {
        let rate_changed = sample_rate != self.state.sample_rate;
        self.state.prepare(sample_rate)?;
        if rate_changed {
            let channel_count = self.channel_count().max(2);
            self.update_settings(channel_count);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.state.release();
    }

    fn process(&mut self, time_position: f64, buffer: &mut [Vec<AudioSample>]) {
        self.state.begin_block(time_position, buffer.len());

        if self.channel_count() != buffer.len() {
            self.update_settings(buffer.len());
        }

        let sample_count = buffer.first().map_or(0, Vec::len);
        for i in 0..sample_count {
            for (channel, samples) in buffer.iter().enumerate() {
                self.input_frame[channel] = samples[i];
            }

            self.compander
                .apply(&self.input_frame, &mut self.output_frame);

            for (channel, samples) in buffer.iter_mut().enumerate() {
                samples[i] = self.output_frame[channel];
            }
        }
    }

    fn set_value(&mut self, name: &str, value: &str, suppress_recalc: bool) -> ValueChangeKind {
        match admit_value(&mut self.map, name, value) {
            SetOutcome::Unchanged | SetOutcome::Refused => ValueChangeKind::NoChange,
            SetOutcome::Stored => {
                let (page, bare_name) = ParameterMap::split_parameter_name(name);

                if bare_name == PARAMETER_NAME_BAND_COUNT {
                    let band_count =
                        params::to_natural(value).clamp(1, MAXIMUM_BAND_COUNT);
                    self.band_count = band_count;
                    self.compander.set_effective_size(band_count);
                    self.map
                        .set_value(PARAMETER_NAME_BAND_COUNT, &band_count.to_string());
                    self.map.change_activeness_by_page(band_count as i32);
                    let channel_count = self.channel_count().max(2);
                    self.update_settings(channel_count);
                    ValueChangeKind::PageCountChange
                } else if bare_name == PARAMETER_NAME_BAND_INDEX {
                    let band_index =
                        params::to_natural(value).clamp(1, self.band_count.max(1));
                    self.map
                        .set_value(PARAMETER_NAME_BAND_INDEX, &band_index.to_string());
                    ValueChangeKind::PageChange
                } else {
                    if page >= 1 && (page as usize) <= MAXIMUM_BAND_COUNT {
                        let data = &mut self.band_parameters[(page - 1) as usize];
                        let numeric = params::to_real(value);
                        match bare_name {
                            PARAMETER_NAME_ATTACK => data.attack = numeric,
                            PARAMETER_NAME_DECAY => data.decay = numeric,
                            PARAMETER_NAME_KNEE => data.db_knee = numeric,
                            PARAMETER_NAME_THRESHOLD => data.db_threshold = numeric,
                            PARAMETER_NAME_RATIO => data.ratio = numeric,
                            PARAMETER_NAME_GAIN => data.db_gain = numeric,
                            PARAMETER_NAME_TOP_FREQUENCY => data.top_frequency = numeric,
                            _ => {}
                        }

                        if !suppress_recalc && (page as usize) <= self.band_count {
                            let channel_count = self.channel_count().max(2);
                            self.update_settings(channel_count);
                        }
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
