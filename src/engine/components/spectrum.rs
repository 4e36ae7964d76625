use std::sync::atomic::Ordering;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::engine::utils::{AtomicF32, CircularArray};
use crate::engine::{Sample, CHANNELS};

/// Number of frequency bands exposed by the tap.
pub const SPECTRUM_BINS: usize = 64;

const FFT_SIZE: usize = 2048;

/// Creates a corresponding pair of [`SpectrumTap`] and [`SpectrumTapProcessor`].
///
/// The processor runs one real FFT over the most recent samples per buffer,
/// and folds the magnitudes into [`SPECTRUM_BINS`] bands readable from any thread.
pub fn spectrum_tap() -> (SpectrumTap, SpectrumTapProcessor) {
    let bins1: Arc<[AtomicF32]> = (0..SPECTRUM_BINS).map(|_| AtomicF32::new(0.0)).collect();
    let bins2 = Arc::clone(&bins1);

    let fft = RealFftPlanner::<Sample>::new().plan_fft_forward(FFT_SIZE);
    let input = fft.make_input_vec();
    let spectrum = fft.make_output_vec();
    let scratch = fft.make_scratch_vec();

    (
        SpectrumTap { bins: bins1 },
        SpectrumTapProcessor {
            bins: bins2,
            window: CircularArray::new(0.0, FFT_SIZE),
            fft,
            input,
            spectrum,
            scratch,
        },
    )
}

/// Acquired via the [`spectrum_tap`] function.
pub struct SpectrumTap {
    bins: Arc<[AtomicF32]>,
}
impl SpectrumTap {
    /// Read the current band magnitudes, normalized to roughly 0..=1 for a full-scale sine.
    pub fn read(&self) -> [f32; SPECTRUM_BINS] {
        let mut result = [0.0; SPECTRUM_BINS];
        for (out, bin) in result.iter_mut().zip(self.bins.iter()) {
            *out = bin.load(Ordering::Relaxed);
        }
        result
    }
}

/// Acquired via the [`spectrum_tap`] function.
pub struct SpectrumTapProcessor {
    bins: Arc<[AtomicF32]>,

    window: CircularArray<Sample>,
    fft: Arc<dyn RealToComplex<Sample>>,
    input: Vec<Sample>,
    spectrum: Vec<Complex<Sample>>,
    scratch: Vec<Complex<Sample>>,
}
impl SpectrumTapProcessor {
    pub fn report(&mut self, buffer: &[Sample]) {
        // Mono mixdown into the analysis window
        for frame in buffer.chunks(CHANNELS) {
            let mono = frame.iter().sum::<Sample>() / CHANNELS as Sample;
            self.window.push_pop(mono);
        }

        for (point, &sample) in self.input.iter_mut().zip(self.window.iter()) {
            *point = sample;
        }
        // Hann window against spectral leakage
        for (i, point) in self.input.iter_mut().enumerate() {
            let phase = i as f32 / FFT_SIZE as f32;
            *point *= 0.5 - 0.5 * (2.0 * std::f32::consts::PI * phase).cos();
        }

        let result = self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch);
        debug_assert!(result.is_ok(), "FFT buffers have mismatched lengths");

        // Fold the spectrum (DC excluded) into bands of equal width
        let band_width = (FFT_SIZE / 2) / SPECTRUM_BINS;
        let scale = 2.0 / (FFT_SIZE / 2) as f32;
        for (band, bin) in self.bins.iter().enumerate() {
            let start = 1 + band * band_width;
            let magnitude_sum: f32 = self.spectrum[start..start + band_width]
                .iter()
                .map(|c| c.norm())
                .sum();
            bin.store(
                magnitude_sum / band_width as f32 * scale,
                Ordering::Relaxed,
            );
        }
    }
}
