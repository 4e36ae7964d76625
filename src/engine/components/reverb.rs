use std::collections::VecDeque;
use std::sync::Arc;

use rand::Rng;
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use super::parameter::{f32_parameter, F32Parameter, F32ParameterProcessor};
use crate::engine::info::Info;
use crate::engine::utils::{dropper::DBox, smallest_pow2};
use crate::engine::{Sample, CHANNELS};

/// Range of the impulse length in seconds.
pub const SIZE_RANGE_SECS: std::ops::RangeInclusive<f32> = 0.2..=3.0;

/// Everything about the reverb bus that is relevant to reconstructing it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ReverbBusState {
    /// Impulse length in seconds.
    pub size: f32,
    pub return_level: f32,
}
impl Default for ReverbBusState {
    fn default() -> Self {
        Self {
            size: 1.6,
            return_level: 0.25,
        }
    }
}

/// Creates a corresponding pair of [`ReverbBus`] and [`ReverbBusProcessor`].
///
/// The processor convolves its input with a generated noise impulse using
/// uniformly partitioned FFT convolution (overlap-save). Regenerating the
/// impulse happens on the controlling thread; the finished kernel is handed
/// over in one piece so the audio thread never computes an FFT plan.
pub fn reverb_bus(
    state: &ReverbBusState,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (ReverbBus, ReverbBusProcessor) {
    let partition_len = smallest_pow2(max_buffer_size as f64);
    let fft_len = 2 * partition_len;

    let mut planner = RealFftPlanner::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let (return_level, return_level_processor) =
        f32_parameter(state.return_level.clamp(0.0, 1.0), sample_rate, max_buffer_size);

    let mut bus = ReverbBus {
        sample_rate,
        partition_len,
        size: state.size.clamp(*SIZE_RANGE_SECS.start(), *SIZE_RANGE_SECS.end()),
        return_level,
        planner,
    };
    let kernel = bus.build_kernel();

    let in_fifo: [VecDeque<Sample>; CHANNELS] =
        std::array::from_fn(|_| VecDeque::with_capacity(2 * partition_len));
    let mut out_fifo: [VecDeque<Sample>; CHANNELS] =
        std::array::from_fn(|_| VecDeque::with_capacity(4 * partition_len));
    for fifo in out_fifo.iter_mut() {
        // Latency of one partition, so a full output block is always available
        fifo.extend(std::iter::repeat(0.0).take(partition_len));
    }

    let fft_scratch = fft.make_scratch_vec();
    let ifft_scratch = ifft.make_scratch_vec();

    (
        bus,
        ReverbBusProcessor {
            kernel: DBox::new(kernel),
            return_level: return_level_processor,

            partition_len,
            fft,
            ifft,
            fft_in: vec![0.0; fft_len],
            spectrum: vec![Complex::new(0.0, 0.0); partition_len + 1],
            accumulator: vec![Complex::new(0.0, 0.0); partition_len + 1],
            fft_scratch,
            ifft_scratch,
            time_out: vec![0.0; fft_len],

            prev_block: std::array::from_fn(|_| vec![0.0; partition_len]),
            in_fifo,
            out_fifo,

            buffer: vec![0.0; max_buffer_size * CHANNELS],
        },
    )
}

/// A noise impulse, partitioned and transformed, ready for the convolver.
///
/// The frequency-domain input history lives in here too, so swapping kernels
/// also swaps in a clean tail.
pub struct ConvolverKernel {
    partitions: Vec<[Vec<Complex<Sample>>; CHANNELS]>,
    history: Vec<[Vec<Complex<Sample>>; CHANNELS]>,
    history_pos: usize,
}
impl ConvolverKernel {
    /// Partition an impulse response and transform each partition.
    fn from_impulse(
        impulse: &[Vec<Sample>; CHANNELS],
        partition_len: usize,
        fft: &dyn RealToComplex<Sample>,
    ) -> Self {
        let impulse_len = impulse[0].len();
        let partition_count = impulse_len.div_ceil(partition_len);

        let mut fft_in = fft.make_input_vec();
        let mut scratch = fft.make_scratch_vec();

        let partitions = (0..partition_count)
            .map(|partition| {
                std::array::from_fn(|channel| {
                    let start = partition * partition_len;
                    let end = (start + partition_len).min(impulse_len);

                    // Zero-padded to double length for linear (not circular) convolution
                    fft_in.fill(0.0);
                    fft_in[..end - start].copy_from_slice(&impulse[channel][start..end]);

                    let mut spectrum = fft.make_output_vec();
                    let result = fft.process_with_scratch(&mut fft_in, &mut spectrum, &mut scratch);
                    debug_assert!(result.is_ok(), "FFT buffers have mismatched lengths");
                    spectrum
                })
            })
            .collect();

        let history = (0..partition_count)
            .map(|_| std::array::from_fn(|_| vec![Complex::new(0.0, 0.0); partition_len + 1]))
            .collect();

        Self {
            partitions,
            history,
            history_pos: 0,
        }
    }
}

/// Acquired via the [`reverb_bus`] function.
pub struct ReverbBus {
    sample_rate: u32,
    partition_len: usize,

    size: f32,
    return_level: F32Parameter,

    planner: RealFftPlanner<Sample>,
}
impl ReverbBus {
    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn return_level(&self) -> f32 {
        self.return_level.get()
    }
    pub fn set_return_level(&self, value: f32) {
        self.return_level.set(value.clamp(0.0, 1.0));
    }

    /// Change the impulse length and regenerate the impulse.
    ///
    /// Returns the new kernel to be swapped into the processor,
    /// or `None` if the clamped size is unchanged.
    #[must_use = "the new kernel must be sent to the processor"]
    pub fn set_size(&mut self, size: f32) -> Option<ConvolverKernel> {
        let size = size.clamp(*SIZE_RANGE_SECS.start(), *SIZE_RANGE_SECS.end());
        if size == self.size {
            return None;
        }

        self.size = size;
        Some(self.build_kernel())
    }

    /// Takes a snapshot of the current state of the bus
    pub(crate) fn state(&self) -> ReverbBusState {
        ReverbBusState {
            size: self.size,
            return_level: self.return_level.get(),
        }
    }

    fn build_kernel(&mut self) -> ConvolverKernel {
        let impulse = self.build_impulse();
        let fft = self.planner.plan_fft_forward(2 * self.partition_len);
        ConvolverKernel::from_impulse(&impulse, self.partition_len, fft.as_ref())
    }

    /// Exponentially decaying noise, a different sequence per channel.
    fn build_impulse(&self) -> [Vec<Sample>; CHANNELS] {
        let length = (self.size * self.sample_rate as f32) as usize;
        let mut rng = rand::rng();

        let mut impulse: [Vec<Sample>; CHANNELS] = std::array::from_fn(|_| {
            (0..length)
                .map(|i| {
                    let decay = (1.0 - i as f32 / length as f32).powf(2.5);
                    rng.random_range(-1.0..1.0) * decay
                })
                .collect()
        });

        // Normalize energy so the return level means the same at every size
        for channel in impulse.iter_mut() {
            let energy: f32 = channel.iter().map(|sample| sample * sample).sum();
            if energy > 0.0 {
                let scale = 1.0 / energy.sqrt();
                for sample in channel {
                    *sample *= scale;
                }
            }
        }

        impulse
    }
}

/// Acquired via the [`reverb_bus`] function.
pub struct ReverbBusProcessor {
    kernel: DBox<ConvolverKernel>,
    return_level: F32ParameterProcessor,

    partition_len: usize,
    fft: Arc<dyn RealToComplex<Sample>>,
    ifft: Arc<dyn ComplexToReal<Sample>>,
    fft_in: Vec<Sample>,
    spectrum: Vec<Complex<Sample>>,
    accumulator: Vec<Complex<Sample>>,
    fft_scratch: Vec<Complex<Sample>>,
    ifft_scratch: Vec<Complex<Sample>>,
    time_out: Vec<Sample>,

    prev_block: [Vec<Sample>; CHANNELS],
    in_fifo: [VecDeque<Sample>; CHANNELS],
    out_fifo: [VecDeque<Sample>; CHANNELS],

    buffer: Vec<Sample>,
}
impl ReverbBusProcessor {
    /// Replace the running kernel. The old one is dropped off-thread.
    pub fn swap_kernel(&mut self, kernel: DBox<ConvolverKernel>) {
        self.kernel = kernel;
    }

    /// Convolve the (interleaved stereo) bus input, returning the scaled wet signal.
    pub fn process(&mut self, info: &Info, input: &[Sample]) -> &mut [Sample] {
        let buffer_size = info.buffer_size;

        for frame in input.chunks(CHANNELS) {
            for (channel, &sample) in frame.iter().enumerate() {
                self.in_fifo[channel].push_back(sample);
            }
        }

        while self.in_fifo[0].len() >= self.partition_len {
            self.process_block();
        }

        let buffer = &mut self.buffer[..buffer_size * CHANNELS];
        let return_level_buffer = self.return_level.get(buffer_size);
        for (frame, &mut level) in buffer
            .chunks_mut(CHANNELS)
            .zip(return_level_buffer.iter_mut())
        {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let wet = self.out_fifo[channel].pop_front().unwrap_or(0.0);
                *sample = wet * level;
            }
        }

        buffer
    }

    fn process_block(&mut self) {
        let partition_len = self.partition_len;
        let fft_len = 2 * partition_len;
        let kernel = &mut *self.kernel;
        let partition_count = kernel.partitions.len();

        for channel in 0..CHANNELS {
            // Overlap-save: [previous block | new block]
            self.fft_in[..partition_len].copy_from_slice(&self.prev_block[channel]);
            for point in self.fft_in[partition_len..].iter_mut() {
                // pop_front cannot fail, the caller checked the length
                *point = self.in_fifo[channel].pop_front().unwrap_or(0.0);
            }
            self.prev_block[channel].copy_from_slice(&self.fft_in[partition_len..]);

            let result = self.fft.process_with_scratch(
                &mut self.fft_in,
                &mut self.spectrum,
                &mut self.fft_scratch,
            );
            debug_assert!(result.is_ok(), "FFT buffers have mismatched lengths");

            kernel.history[kernel.history_pos][channel].copy_from_slice(&self.spectrum);

            // Frequency-domain delay line: partition k sees the input from k blocks ago
            self.accumulator.fill(Complex::new(0.0, 0.0));
            for (k, partition) in kernel.partitions.iter().enumerate() {
                let slot = (kernel.history_pos + partition_count - k) % partition_count;
                for ((acc, &h), &x) in self
                    .accumulator
                    .iter_mut()
                    .zip(partition[channel].iter())
                    .zip(kernel.history[slot][channel].iter())
                {
                    *acc += h * x;
                }
            }

            let result = self.ifft.process_with_scratch(
                &mut self.accumulator,
                &mut self.time_out,
                &mut self.ifft_scratch,
            );
            debug_assert!(result.is_ok(), "FFT buffers have mismatched lengths");

            // Only the second half is valid linear convolution output
            let scale = 1.0 / fft_len as Sample;
            for &sample in &self.time_out[partition_len..] {
                self.out_fifo[channel].push_back(sample * scale);
            }
        }

        kernel.history_pos = (kernel.history_pos + 1) % partition_count;
    }
}
