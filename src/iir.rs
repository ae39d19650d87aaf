//! Infinite Impulse Response Filter
//!
//! A direct-form-I IIR filter of fixed order (3 or 5 in this crate) whose
//! state lives in caller-owned ring buffers. Coefficients are stored flat
//! as `[b0..b_{N-1}, a0..a_{N-1}]` and are always normalized by `a0` on
//! installation, so the stored `a0` is 1 for any non-null filter.

use crate::ring_buffer::SampleRingBuffer;
use crate::AudioSample;

/// Filter order used by the biquad-family effects.
pub const ORDER_BIQUAD: usize = 3;

/// Filter order used by the squared-biquad Linkwitz-Riley sections.
pub const ORDER_LINKWITZ_RILEY: usize = 5;

#[derive(Debug, Clone)]
pub struct IirFilter {
    data: Vec<AudioSample>,
    order: usize,
}

impl IirFilter {
    /// Create a null filter (all coefficients zero, producing silence) of
    /// the given order.
    pub fn new(order: usize) -> Self {
        Self {
            data: vec![0.0; order * 2],
            order,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Reset to the null filter.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Install the constant filter `H(z) = b0`; `b0 = 1` is the identity,
    /// `b0 = 0` rejects everything.
    pub fn set_unit(&mut self, b0: AudioSample) {
        self.clear();
        self.data[0] = b0;
        self.data[self.order] = 1.0;
    }

    /// Install explicit order-3 coefficients, normalized by `a0`.
    pub fn set_order3(
        &mut self,
        b0: AudioSample,
        b1: AudioSample,
        b2: AudioSample,
        a0: AudioSample,
        a1: AudioSample,
        a2: AudioSample,
    ) {
        assert!(self.order == ORDER_BIQUAD, "filter order must be 3");
        self.data.copy_from_slice(&[b0, b1, b2, a0, a1, a2]);
        self.normalize();
    }

    /// Install explicit order-5 coefficients, normalized by `a0`.
    pub fn set_order5(&mut self, b: [AudioSample; 5], a: [AudioSample; 5]) {
        assert!(self.order == ORDER_LINKWITZ_RILEY, "filter order must be 5");
        self.data[..5].copy_from_slice(&b);
        self.data[5..].copy_from_slice(&a);
        self.normalize();
    }

    fn normalize(&mut self) {
        let reference = self.data[self.order];
        if reference != 0.0 {
            for coefficient in &mut self.data {
                *coefficient /= reference;
            }
        }
    }

    /// Run one filter step. `input.first()` must be the current input
    /// sample, `input.at(k)`/`output.at(k)` the samples `k` steps back.
    /// The result is written to `output.set_first(..)`; nothing is
    /// allocated.
    #[inline]
    pub fn apply(&self, input: &SampleRingBuffer, output: &mut SampleRingBuffer) {
        let order = self.order;
        let mut value = self.data[0] * input.first();

        for k in 1..order {
            value += self.data[k] * input.at(k);
            value -= self.data[order + k] * output.at(k);
        }

        output.set_first(value);
    }
}
