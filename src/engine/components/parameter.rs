use std::sync::{atomic::Ordering, Arc};

use crate::engine::utils::{AtomicF32, MovingAverage};

/// Length of the smoothing window applied to every parameter change, in milliseconds.
const RAMP_MS: u32 = 10;

/// Creates a corresponding pair of [`F32Parameter`] and [`F32ParameterProcessor`].
///
/// The [`F32ParameterProcessor`] should live on the audio thread, while the [`F32Parameter`] should not.
pub fn f32_parameter(
    initial: f32,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (F32Parameter, F32ParameterProcessor) {
    let desired1 = Arc::new(AtomicF32::new(initial));
    let desired2 = Arc::clone(&desired1);

    let window_size = ((sample_rate * RAMP_MS) / 1000).max(1) as usize;

    (
        F32Parameter { desired: desired1 },
        F32ParameterProcessor {
            desired: desired2,
            buffer: vec![0.0; max_buffer_size],
            moving_average: MovingAverage::new(initial, window_size),
        },
    )
}

/// Represents a numeric value, controlled by the user - by a knob or slider for example.
///
/// The value is smoothed (via simple moving average) on the audio thread,
/// to avoid distortion and clicking in the sound.
pub struct F32Parameter {
    desired: Arc<AtomicF32>,
}
impl F32Parameter {
    pub fn set(&self, new_value: f32) {
        self.desired.store(new_value, Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        self.desired.load(Ordering::Relaxed)
    }
}

pub struct F32ParameterProcessor {
    desired: Arc<AtomicF32>,

    buffer: Vec<f32>,
    moving_average: MovingAverage,
}
impl F32ParameterProcessor {
    /// Get the smoothed value for each sample point in the current buffer.
    pub fn get(&mut self, buffer_size: usize) -> &mut [f32] {
        let desired = self.desired.load(Ordering::Relaxed);

        for point in self.buffer[..buffer_size].iter_mut() {
            self.moving_average.push(desired);
            *point = self.moving_average.average();
        }

        &mut self.buffer[..buffer_size]
    }

    /// Advance the smoothing by a whole buffer, and get only the final value.
    ///
    /// Cheaper than [`Self::get`] for values that are only applied once per buffer.
    pub fn advance(&mut self, buffer_size: usize) -> f32 {
        let desired = self.desired.load(Ordering::Relaxed);

        for _ in 0..buffer_size {
            self.moving_average.push(desired);
        }

        self.moving_average.average()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_desired_value() {
        let (parameter, mut processor) = f32_parameter(0.0, 48_000, 1024);

        parameter.set(1.0);

        // The window is 480 samples long, so one 1024-sample buffer is more than enough.
        let buffer = processor.get(1024);
        let last = *buffer.last().unwrap();
        assert_eq!(last, 1.0);
    }

    #[test]
    fn ramps_monotonically() {
        let (parameter, mut processor) = f32_parameter(0.0, 48_000, 256);

        parameter.set(1.0);

        let buffer = processor.get(256);
        for pair in buffer.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(buffer[0] < 0.1);
    }

    #[test]
    fn advance_matches_get() {
        let (parameter1, mut processor1) = f32_parameter(0.0, 48_000, 128);
        let (parameter2, mut processor2) = f32_parameter(0.0, 48_000, 128);

        parameter1.set(2.0);
        parameter2.set(2.0);

        let last = *processor1.get(128).last().unwrap();
        let advanced = processor2.advance(128);

        assert_eq!(last, advanced);
    }
}
