//! # soxfx: SoX Effect DSP Cores
//!
//! `soxfx` re-implements a selection of SoX (Sound eXchange) effects as
//! sample-accurate, host-agnostic DSP kernels suitable for real-time
//! audio plugins. The host framework, GUI and file handling live
//! elsewhere; this crate is only the signal processing and the typed
//! parameter surface that drives it.
//!
//! ## Effects
//!
//! | Effect | Algorithm |
//! |--------|-----------|
//! | [`CompanderEffect`] | multiband compander: envelope follower, piecewise transfer curve with rounded knees, Linkwitz-Riley 4th-order crossover tree |
//! | [`ReverbEffect`] | Freeverb: 8 parallel combs into 4 serial allpasses per line, predelay, stereo cross-mix |
//! | [`PhaserTremoloEffect`] | shared time-locked LFO driving a modulated delay line (phaser) or an amplitude envelope (tremolo) |
//! | [`FilterEffect`] | the biquad family: lowpass … treble, five bandwidth units |
//! | [`GainEffect`] | plain dB gain |
//!
//! ## The processing contract
//!
//! Every effect implements [`AudioEffect`]: the host calls
//! [`AudioEffect::prepare`] with the session sample rate, then repeatedly
//! [`AudioEffect::process`] with a transport time and a channel-major
//! sample buffer that is overwritten in place. Parameter changes arrive
//! between blocks as strings via [`AudioEffect::set_value`] and are
//! validated against the effect's [`ParameterMap`]; the returned
//! [`ValueChangeKind`] tells the host how much of its UI to refresh.
//! Processing paths never allocate and never fail.
//!
//! ```rust
//! use soxfx::prelude::*;
//!
//! let mut effect = GainEffect::new();
//! effect.set_value("Gain [dB]", "6", false);
//! effect.prepare(44100.0).unwrap();
//!
//! let mut buffer = vec![vec![0.5f64; 512]; 2]; // stereo block
//! effect.process(0.0, &mut buffer);
//! ```
//!
//! ## Parameter persistence
//!
//! [`persist::serialize`] renders an effect's parameters as a
//! human-readable key/value block; [`persist::restore`] reads it back,
//! tolerating unknown keys and foreign titles. Round-trips are
//! byte-identical.
//!
//! ## Module map
//!
//! - [`ring_buffer`] - circular sample queues and the crossover matrix
//! - [`iir`] - order-3/5 direct-form-I IIR filter
//! - [`waveform`] - shared wave tables and the drift-free LFO cursor
//! - [`params`] - the typed, ranged, paged parameter dictionary
//! - [`effect`] - the effect trait, base state and error type
//! - [`persist`] - key/value state persistence
//! - [`compander`], [`reverb`], [`modulation`], [`filter`], [`gain`] -
//!   the effects themselves

pub mod compander;
pub mod effect;
pub mod filter;
pub mod gain;
pub mod iir;
pub mod modulation;
pub mod params;
pub mod persist;
pub mod reverb;
pub mod ring_buffer;
pub mod waveform;

/// One audio sample. All internal DSP state uses this precision.
pub type AudioSample = f64;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::effect::{db_to_linear, AudioEffect, EffectError, EffectState};
    pub use crate::params::{ParameterKind, ParameterMap, ValueChangeKind};

    pub use crate::compander::{CompanderEffect, MultibandCompander, TransferFunction};
    pub use crate::filter::{BandwidthUnit, FilterEffect, FilterKind};
    pub use crate::gain::GainEffect;
    pub use crate::modulation::{ModulationKind, PhaserTremoloEffect};
    pub use crate::reverb::{ReverbCore, ReverbEffect};

    pub use crate::iir::IirFilter;
    pub use crate::persist;
    pub use crate::ring_buffer::{SampleRingBuffer, SampleRingBufferMatrix};
    pub use crate::waveform::{Waveform, WaveformKind};

    pub use crate::AudioSample;
}

// Re-export key types at crate root for convenience
pub use prelude::*;
