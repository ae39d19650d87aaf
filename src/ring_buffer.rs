//! Ring Buffers for Audio Samples
//!
//! Fixed-capacity circular sample queues with O(1) shifts in both
//! directions, plus a channel-by-slot matrix of ring buffers used by the
//! multiband crossover chain.

use crate::AudioSample;

/// A circular queue of audio samples.
///
/// Logical index 0 is the *first* (head) sample; the mapping to storage is
/// `physical = (first_index + logical) % len`. Shifting in either direction
/// only moves the cursor, so both shifts are O(1) regardless of length.
#[derive(Debug, Clone, Default)]
pub struct SampleRingBuffer {
    data: Vec<AudioSample>,
    length: usize,
    first_index: usize,
}

impl SampleRingBuffer {
    /// Create a ring buffer holding `length` zero samples.
    pub fn new(length: usize) -> Self {
        Self {
            data: vec![0.0; length],
            length,
            first_index: 0,
        }
    }

    /// Effective number of samples in the buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Resize to `length` samples. Grows the allocation when needed,
    /// zero-fills the contents and resets the cursor. Only called from
    /// setup paths, never while processing.
    pub fn set_length(&mut self, length: usize) {
        if length > self.data.len() {
            self.data.resize(length, 0.0);
        }
        self.length = length;
        self.first_index = 0;
        self.data[..length].fill(0.0);
    }

    /// Set all samples to zero without changing the length.
    pub fn zero(&mut self) {
        self.data[..self.length].fill(0.0);
    }

    #[inline]
    fn physical(&self, position: usize) -> usize {
        debug_assert!(position < self.length, "ring buffer index out of range");
        (self.first_index + position) % self.length
    }

    /// Sample at logical `position` (0 = first). Panics when out of range.
    #[inline]
    pub fn at(&self, position: usize) -> AudioSample {
        assert!(
            position < self.length,
            "ring buffer read at {} exceeds length {}",
            position,
            self.length
        );
        self.data[self.physical(position)]
    }

    /// Overwrite the sample at logical `position`. Panics when out of range.
    #[inline]
    pub fn set(&mut self, position: usize, sample: AudioSample) {
        assert!(
            position < self.length,
            "ring buffer write at {} exceeds length {}",
            position,
            self.length
        );
        let index = self.physical(position);
        self.data[index] = sample;
    }

    /// First (oldest for the left-shift convention) sample.
    #[inline]
    pub fn first(&self) -> AudioSample {
        self.at(0)
    }

    /// Last sample.
    #[inline]
    pub fn last(&self) -> AudioSample {
        self.at(self.length - 1)
    }

    #[inline]
    pub fn set_first(&mut self, sample: AudioSample) {
        self.set(0, sample);
    }

    #[inline]
    pub fn set_last(&mut self, sample: AudioSample) {
        let position = self.length - 1;
        self.set(position, sample);
    }

    /// Discard the first sample, shift everything one position toward the
    /// head and append `sample` as the new last entry.
    #[inline]
    pub fn shift_left(&mut self, sample: AudioSample) {
        self.first_index = (self.first_index + 1) % self.length;
        self.set_last(sample);
    }

    /// Discard the last sample, shift everything one position toward the
    /// tail and insert `sample` as the new first entry.
    #[inline]
    pub fn shift_right(&mut self, sample: AudioSample) {
        self.first_index = (self.first_index + self.length - 1) % self.length;
        self.set_first(sample);
    }

    /// Copy all samples in logical order into `target`, which must hold at
    /// least `len()` entries.
    pub fn to_array(&self, target: &mut [AudioSample]) {
        assert!(target.len() >= self.length, "target array too short");
        for position in 0..self.length {
            target[position] = self.data[self.physical(position)];
        }
    }
}

/// A (channel × slot) matrix of ring buffers with single ownership.
///
/// The multiband compander wires its crossover chain through this matrix:
/// band `k` reads slot `2k` and writes slots `2k+1` (low) and `2k+2`
/// (high), so consecutive bands overlap on one shared buffer. Bands store
/// slot indices instead of references; the matrix hands out the disjoint
/// `(input, low, high)` triple on demand.
#[derive(Debug, Clone, Default)]
pub struct SampleRingBufferMatrix {
    rows: Vec<Vec<SampleRingBuffer>>,
}

impl SampleRingBufferMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the matrix as `channel_count` rows of `slot_count` buffers,
    /// each of length `buffer_length`.
    pub fn resize(&mut self, channel_count: usize, slot_count: usize, buffer_length: usize) {
        self.rows = (0..channel_count)
            .map(|_| {
                (0..slot_count)
                    .map(|_| SampleRingBuffer::new(buffer_length))
                    .collect()
            })
            .collect();
    }

    pub fn channel_count(&self) -> usize {
        self.rows.len()
    }

    pub fn slot_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn at(&self, channel: usize, slot: usize) -> &SampleRingBuffer {
        &self.rows[channel][slot]
    }

    pub fn at_mut(&mut self, channel: usize, slot: usize) -> &mut SampleRingBuffer {
        &mut self.rows[channel][slot]
    }

    /// Borrow the crossover triple `(input, low, high)` rooted at
    /// `base_slot` for one channel. The three slots are consecutive, which
    /// lets the borrows be split without copying.
    pub fn crossover_triple(
        &mut self,
        channel: usize,
        base_slot: usize,
    ) -> (&SampleRingBuffer, &mut SampleRingBuffer, &mut SampleRingBuffer) {
        let window = &mut self.rows[channel][base_slot..base_slot + 3];
        let (input, rest) = window.split_first_mut().expect("slot window is non-empty");
        let (low, rest) = rest.split_first_mut().expect("slot window has a low slot");
        let (high, _) = rest.split_first_mut().expect("slot window has a high slot");
        (input, low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buffer = SampleRingBuffer::new(4);
        assert_eq!(buffer.len(), 4);
        for i in 0..4 {
            assert_eq!(buffer.at(i), 0.0);
        }
    }

    #[test]
    fn test_shift_left_keeps_newest_window() {
        // After n >= capacity shifts the buffer holds the last `capacity`
        // samples with the oldest at the head.
        let mut buffer = SampleRingBuffer::new(3);
        for n in 1..=10 {
            buffer.shift_left(n as AudioSample);
        }
        assert_eq!(buffer.first(), 8.0);
        assert_eq!(buffer.at(1), 9.0);
        assert_eq!(buffer.last(), 10.0);
    }

    #[test]
    fn test_shift_right_is_mirror_of_shift_left() {
        let mut buffer = SampleRingBuffer::new(3);
        for n in 1..=10 {
            buffer.shift_right(n as AudioSample);
        }
        assert_eq!(buffer.first(), 10.0);
        assert_eq!(buffer.at(1), 9.0);
        assert_eq!(buffer.last(), 8.0);
    }

    #[test]
    fn test_shift_left_equals_drop_and_append() {
        let mut buffer = SampleRingBuffer::new(4);
        for n in 0..4 {
            buffer.set(n, n as AudioSample);
        }
        buffer.shift_left(9.0);
        let mut contents = [0.0; 4];
        buffer.to_array(&mut contents);
        assert_eq!(contents, [1.0, 2.0, 3.0, 9.0]);
    }

    #[test]
    fn test_set_length_zero_fills() {
        let mut buffer = SampleRingBuffer::new(2);
        buffer.shift_left(5.0);
        buffer.set_length(6);
        assert_eq!(buffer.len(), 6);
        for i in 0..6 {
            assert_eq!(buffer.at(i), 0.0);
        }
    }

    #[test]
    fn test_first_last_accessors() {
        let mut buffer = SampleRingBuffer::new(3);
        buffer.set_first(1.5);
        buffer.set_last(-2.5);
        assert_eq!(buffer.first(), 1.5);
        assert_eq!(buffer.last(), -2.5);
        buffer.zero();
        assert_eq!(buffer.first(), 0.0);
        assert_eq!(buffer.last(), 0.0);
    }

    #[test]
    #[should_panic(expected = "ring buffer read")]
    fn test_out_of_range_read_panics() {
        let buffer = SampleRingBuffer::new(2);
        let _ = buffer.at(2);
    }

    #[test]
    fn test_matrix_crossover_triple_is_disjoint() {
        let mut matrix = SampleRingBufferMatrix::new();
        matrix.resize(2, 5, 5);
        assert_eq!(matrix.channel_count(), 2);
        assert_eq!(matrix.slot_count(), 5);

        let (input, low, high) = matrix.crossover_triple(1, 2);
        assert_eq!(input.len(), 5);
        low.set_first(1.0);
        high.set_first(2.0);
        assert_eq!(matrix.at(1, 3).first(), 1.0);
        assert_eq!(matrix.at(1, 4).first(), 2.0);
    }
}
