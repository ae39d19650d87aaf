//! Phaser / Tremolo Effect
//!
//! The two SoX modulation effects share their parameters and most of
//! their machinery, so they live in one effect with an `Effect Kind`
//! switch. Both drive a shared LFO whose phase is locked to transport
//! time; the phaser additionally runs a short modulated delay line per
//! channel.
//!
//! After SoX `phaser.c` (Juergen Mueller), `synth.c` (Carsten Borchardt,
//! Rob Sewell) and `tremolo.c` (Rob Sewell).

use core::f64::consts::FRAC_PI_2;

use libm::Libm;
use serde::{Deserialize, Serialize};

use crate::effect::{admit_value, AudioEffect, EffectError, EffectState, SetOutcome};
use crate::params::{self, ParameterMap, ValueChangeKind};
use crate::ring_buffer::SampleRingBuffer;
use crate::waveform::{Waveform, WaveformKind};
use crate::AudioSample;

/// The maximum allowable phaser delay in seconds.
const MAXIMUM_DELAY: f64 = 0.005;

/// Phasers traditionally start a quarter turn into the LFO cycle.
const DEFAULT_PHASE: f64 = FRAC_PI_2;

const KIND_PHASER: &str = "Phaser";
const KIND_TREMOLO: &str = "Tremolo";

const PARAMETER_NAME_DECAY: &str = "Decay";
const PARAMETER_NAME_DELAY: &str = "Delay [ms]";
const PARAMETER_NAME_DEPTH: &str = "Depth [%]";
const PARAMETER_NAME_EFFECT_KIND: &str = "Effect Kind";
const PARAMETER_NAME_FREQUENCY: &str = "Modulation [Hz]";
const PARAMETER_NAME_IN_GAIN: &str = "In Gain [dB]";
const PARAMETER_NAME_OUT_GAIN: &str = "Out Gain [dB]";
const PARAMETER_NAME_TIME_OFFSET: &str = "Time Offset [s]";
const PARAMETER_NAME_WAVEFORM: &str = "Waveform";

/// Which of the two effects is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModulationKind {
    Phaser,
    Tremolo,
}

/// Derived settings for the active effect kind.
///
/// For the tremolo the phaser parameters are forced to fixed values:
/// zero delay, unit gains, sine waveform (users rely on this, so the
/// stored parameter values are deliberately ignored). For the phaser the
/// depth parameter is not relevant.
#[derive(Debug)]
struct ModulationDescriptor {
    kind: ModulationKind,
    frequency: f64,
    waveform_kind: WaveformKind,
    waveform: Waveform,
    time_offset: f64,
    in_gain: f64,
    out_gain: f64,
    /// Phaser delay in seconds.
    delay: f64,
    decay: f64,
    /// Tremolo depth in percent.
    depth: f64,
    delay_lines: Vec<SampleRingBuffer>,
    delay_line_length: usize,
    delay_line_index: usize,
}

impl ModulationDescriptor {
    fn new() -> Self {
        Self {
            kind: ModulationKind::Phaser,
            frequency: 0.5,
            waveform_kind: WaveformKind::Triangle,
            waveform: Waveform::new(),
            time_offset: 0.0,
            in_gain: 0.4,
            out_gain: 0.74,
            delay: 0.003,
            decay: 0.4,
            depth: 40.0,
            delay_lines: vec![SampleRingBuffer::new(1); 2],
            delay_line_length: 0,
            delay_line_index: 0,
        }
    }
}

/// The combined SoX phaser & tremolo effect.
pub struct PhaserTremoloEffect {
    state: EffectState,
    map: ParameterMap,
    descriptor: ModulationDescriptor,
}

impl PhaserTremoloEffect {
    pub fn new() -> Self {
        let mut effect = Self {
            state: EffectState::new(),
            map: ParameterMap::new(),
            descriptor: ModulationDescriptor::new(),
        };
        effect.initialize_parameters(KIND_TREMOLO);
        effect.descriptor.kind = ModulationKind::Tremolo;
        effect.set_default_values();
        effect
    }

    /// Rebuild the parameter map for `effect_kind`; the parameter set is
    /// kind-dependent.
    fn initialize_parameters(&mut self, effect_kind: &str) {
        let is_tremolo = effect_kind == KIND_TREMOLO;

        self.map.clear();
        self.map.set_kind_and_value_enum(
            PARAMETER_NAME_EFFECT_KIND,
            &[KIND_PHASER, KIND_TREMOLO],
            effect_kind,
        );

        if is_tremolo {
            self.map
                .set_kind_real(PARAMETER_NAME_FREQUENCY, 0.1, 2.0, 0.001);
            self.map.set_kind_real(PARAMETER_NAME_DEPTH, 0.0, 100.0, 0.001);
        } else {
            self.map.set_kind_real(PARAMETER_NAME_IN_GAIN, 0.0, 1.0, 0.001);
            self.map
                .set_kind_real(PARAMETER_NAME_OUT_GAIN, 0.0, 1000.0, 0.001);
            self.map.set_kind_real(PARAMETER_NAME_DELAY, 0.0, 5.0, 0.001);
            self.map.set_kind_real(PARAMETER_NAME_DECAY, 0.0, 0.99, 0.001);
            self.map
                .set_kind_real(PARAMETER_NAME_FREQUENCY, 0.1, 2.0, 0.001);
            self.map
                .set_kind_enum(PARAMETER_NAME_WAVEFORM, &["Sine", "Triangle"]);
        }

        self.map
            .set_kind_real(PARAMETER_NAME_TIME_OFFSET, -1e5, 1e5, 0.0001);
    }

    /// Recompute the waveform and delay line from the stored parameters,
    /// re-locking the LFO phase to the current transport time.
    fn update_settings(&mut self) {
        let descriptor = &mut self.descriptor;
        let sample_rate = self.state.sample_rate;
        let frequency = descriptor.frequency;
        let period_samples = sample_rate / frequency;

        let (delay_line_length, low, high, has_integer_values) = match descriptor.kind {
            ModulationKind::Phaser => {
                let length = Libm::<f64>::round(descriptor.delay * sample_rate) as usize;
                (length, 1.0, length as f64, true)
            }
            ModulationKind::Tremolo => {
                // the tremolo disregards the configured waveform and
                // delay; the LFO range encodes the depth directly
                descriptor.delay = 0.0;
                descriptor.in_gain = 1.0;
                descriptor.out_gain = 1.0;
                descriptor.waveform_kind = WaveformKind::Sine;
                (0, 1.0 - descriptor.depth / 100.0, 1.0, false)
            }
        };

        descriptor.delay_line_index = 0;
        descriptor.delay_line_length = delay_line_length;
        for line in &mut descriptor.delay_lines {
            line.set_length(delay_line_length);
        }

        let current_time = self.state.current_time_position;
        let lock_time = if current_time.is_finite() {
            current_time
        } else {
            descriptor.time_offset
        };
        let phase = DEFAULT_PHASE
            + Waveform::phase_by_time(frequency, descriptor.time_offset, lock_time);

        descriptor.waveform.set(
            period_samples,
            descriptor.waveform_kind,
            low,
            high,
            phase,
            has_integer_values,
        );

        log::debug!(
            "phaser/tremolo settings: kind = {:?}, period = {} samples, delay line = {}",
            descriptor.kind,
            period_samples,
            delay_line_length
        );
    }

    fn apply_parameter(&mut self, name: &str, value: &str) {
        let descriptor = &mut self.descriptor;
        match name {
            PARAMETER_NAME_DECAY => descriptor.decay = params::to_real(value),
            PARAMETER_NAME_DELAY => descriptor.delay = params::to_real(value) / 1000.0,
            PARAMETER_NAME_DEPTH => descriptor.depth = params::to_real(value),
            PARAMETER_NAME_FREQUENCY => descriptor.frequency = params::to_real(value),
            PARAMETER_NAME_IN_GAIN => descriptor.in_gain = params::to_real(value),
            PARAMETER_NAME_OUT_GAIN => descriptor.out_gain = params::to_real(value),
            PARAMETER_NAME_TIME_OFFSET => descriptor.time_offset = params::to_real(value),
            PARAMETER_NAME_WAVEFORM => {
                descriptor.waveform_kind = if value == "Sine" {
                    WaveformKind::Sine
                } else {
                    WaveformKind::Triangle
                };
            }
            _ => {}
        }
    }
}

impl Default for PhaserTremoloEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEffect for PhaserTremoloEffect {
    fn name(&self) -> &'static str {
        "SoX Phaser & Tremolo"
    }

    fn parameter_map(&self) -> &ParameterMap {
        &self.map
    }

    fn parameter_map_mut(&mut self) -> &mut ParameterMap {
        &mut self.map
    }

    fn set_default_values(&mut self) {
        let is_tremolo = self.map.value(PARAMETER_NAME_EFFECT_KIND) == KIND_TREMOLO;

        if is_tremolo {
            self.set_value(PARAMETER_NAME_FREQUENCY, "0.5", true);
            self.set_value(PARAMETER_NAME_DEPTH, "40", true);
        } else {
            self.set_value(PARAMETER_NAME_IN_GAIN, "0.4", true);
            self.set_value(PARAMETER_NAME_OUT_GAIN, "0.74", true);
            self.set_value(PARAMETER_NAME_DELAY, "3.0", true);
            self.set_value(PARAMETER_NAME_DECAY, "0.4", true);
            self.set_value(PARAMETER_NAME_FREQUENCY, "0.5", true);
            self.set_value(PARAMETER_NAME_WAVEFORM, "Triangle", true);
        }

        self.set_value(PARAMETER_NAME_TIME_OFFSET, "0", true);
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

        if self.state.time_position_has_moved {
            // the playhead jumped: re-lock the LFO to transport time
            self.update_settings();
        }

        if self.descriptor.delay_lines.len() != buffer.len() {
            let length = self.descriptor.delay_line_length;
            self.descriptor.delay_lines =
                vec![SampleRingBuffer::new(length.max(1)); buffer.len()];
        }

        let descriptor = &mut self.descriptor;
        let is_phaser = descriptor.kind == ModulationKind::Phaser;
        let in_gain = descriptor.in_gain;
        let out_gain = descriptor.out_gain;
        let decay = descriptor.decay;
        let delay_line_length = descriptor.delay_line_length;

        // all channels run over the identical LFO trajectory and delay
        // cursor, so both are restored from a snapshot per channel
        let waveform_state = descriptor.waveform.state();
        let mut delay_line_index = descriptor.delay_line_index;

        for (channel, samples) in buffer.iter_mut().enumerate() {
            let delay_line = &mut descriptor.delay_lines[channel];
            descriptor.waveform.set_state(waveform_state);
            delay_line_index = descriptor.delay_line_index;

            for sample in samples.iter_mut() {
                let input_sample = *sample;
                let mut output_sample = 0.0;

                if !is_phaser {
                    output_sample = input_sample * descriptor.waveform.current();
                } else if delay_line_length > 0 {
                    let modulated_index = (delay_line_index
                        + Libm::<f64>::floor(descriptor.waveform.current()) as usize)
                        % delay_line_length;
                    let mut value =
                        input_sample * in_gain + delay_line.at(modulated_index) * decay;
                    delay_line_index = (delay_line_index + 1) % delay_line_length;
                    delay_line.set(delay_line_index, value);
                    value *= out_gain;
                    output_sample = value;
                }

                *sample = output_sample;
                descriptor.waveform.advance();
            }
        }

        descriptor.delay_line_index = delay_line_index;
    }

    fn set_value(&mut self, name: &str, value: &str, suppress_recalc: bool) -> ValueChangeKind {
        match admit_value(&mut self.map, name, value) {
            SetOutcome::Unchanged | SetOutcome::Refused => ValueChangeKind::NoChange,
            SetOutcome::Stored => {
                if name == PARAMETER_NAME_EFFECT_KIND {
                    self.initialize_parameters(value);
                    self.descriptor.kind = if value == KIND_TREMOLO {
                        ModulationKind::Tremolo
                    } else {
                        ModulationKind::Phaser
                    };
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
