use crate::engine::{Sample, CHANNELS};

/// Component for the simple addition of signals.
///
/// Mixing is done via 64-bit summing.
pub struct MixPoint {
    sum_buffer: Vec<f64>,
    output_buffer: Vec<Sample>,
}
impl MixPoint {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            sum_buffer: vec![0.0; max_buffer_size * CHANNELS],
            output_buffer: vec![0.0; max_buffer_size * CHANNELS],
        }
    }

    /// Zero the sum in preparation of a new buffer.
    pub fn reset(&mut self) {
        self.sum_buffer.fill(0.0);
    }

    /// Add a signal to the sum.
    ///
    /// All buffers added between two resets must be of equal size.
    pub fn add(&mut self, buffer: &[Sample]) {
        debug_assert!(buffer.len() <= self.sum_buffer.len());

        for (sum_sample, &input_sample) in self.sum_buffer.iter_mut().zip(buffer) {
            *sum_sample += f64::from(input_sample);
        }
    }

    /// Get the sum of all buffers added since the last reset.
    ///
    /// Result is not clipped.
    pub fn output(&mut self, buffer_size: usize) -> &mut [Sample] {
        let sample_count = buffer_size * CHANNELS;
        for (output_sample, &sum_sample) in self.output_buffer[..sample_count]
            .iter_mut()
            .zip(self.sum_buffer.iter())
        {
            *output_sample = sum_sample as Sample;
        }

        &mut self.output_buffer[..sample_count]
    }
}
