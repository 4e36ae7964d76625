use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::utils::{AtomicF32, Rms};
use crate::engine::{Sample, CHANNELS};

/// Sample values at or above this count as clipping.
const CLIP_THRESHOLD: Sample = 0.98;
/// How long the clip indicator stays lit after the last clipped sample.
const CLIP_HOLD_SECS: f32 = 0.5;

/// Creates a corresponding pair of [`AudioMeter`] and [`AudioMeterProcessor`].
///
/// The [`AudioMeterProcessor`] should live on the audio thread, while the [`AudioMeter`] should not.
pub fn audio_meter(sample_rate: u32) -> (AudioMeter, AudioMeterProcessor) {
    let peak1 = Arc::new([AtomicF32::new(0.0), AtomicF32::new(0.0)]);
    let peak2 = Arc::clone(&peak1);

    let rms1 = Arc::new([AtomicF32::new(0.0), AtomicF32::new(0.0)]);
    let rms2 = Arc::clone(&rms1);

    let clipped1 = Arc::new(AtomicBool::new(false));
    let clipped2 = Arc::clone(&clipped1);

    // 100 ms RMS window
    let rms_window = (sample_rate / 10).max(1) as usize;

    (
        AudioMeter {
            peak: peak1,
            rms: rms1,
            clipped: clipped1,
        },
        AudioMeterProcessor {
            peak: peak2,
            rms: rms2,
            rms_history: [Rms::new(rms_window), Rms::new(rms_window)],
            clipped: clipped2,
            since_last_clip: CLIP_HOLD_SECS,
        },
    )
}

/// One momentary reading of a meter tap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeterReading {
    /// Peak of the last buffer, per channel.
    pub peak: [Sample; CHANNELS],
    /// Root-mean-square over the last ~100 ms, per channel.
    pub rms: [Sample; CHANNELS],
    /// Whether the signal clipped recently.
    pub clipped: bool,
}

/// Acquired via the [`audio_meter`] function.
pub struct AudioMeter {
    peak: Arc<[AtomicF32; CHANNELS]>,
    rms: Arc<[AtomicF32; CHANNELS]>,
    clipped: Arc<AtomicBool>,
}
impl AudioMeter {
    pub fn read(&self) -> MeterReading {
        let mut reading = MeterReading {
            peak: [0.0; CHANNELS],
            rms: [0.0; CHANNELS],
            clipped: self.clipped.load(Ordering::Relaxed),
        };

        for (out, atomic) in reading.peak.iter_mut().zip(self.peak.iter()) {
            *out = atomic.load(Ordering::Relaxed);
        }
        for (out, atomic) in reading.rms.iter_mut().zip(self.rms.iter()) {
            *out = atomic.load(Ordering::Relaxed);
        }

        reading
    }
}

/// Acquired via the [`audio_meter`] function.
pub struct AudioMeterProcessor {
    peak: Arc<[AtomicF32; CHANNELS]>,

    rms: Arc<[AtomicF32; CHANNELS]>,
    rms_history: [Rms; CHANNELS],

    clipped: Arc<AtomicBool>,
    since_last_clip: f32,
}
impl AudioMeterProcessor {
    pub fn report(&mut self, buffer: &[Sample], sample_rate: f32) {
        self.peak(buffer);
        self.rms(buffer);
        self.clip(buffer, sample_rate);
    }

    /// Locates the peak of the buffer and syncs it to the corresponding [`AudioMeter`].
    fn peak(&mut self, buffer: &[Sample]) {
        let mut max_values = [0.0_f32; CHANNELS];
        for frame in buffer.chunks(CHANNELS) {
            for (max, &value) in max_values.iter_mut().zip(frame) {
                if value.abs() > *max {
                    *max = value.abs();
                }
            }
        }
        for (peak, max) in self.peak.iter().zip(max_values) {
            peak.store(max, Ordering::Relaxed);
        }
    }

    /// Calculates the root-mean-square of the signal, and syncs it to the corresponding [`AudioMeter`].
    fn rms(&mut self, buffer: &[Sample]) {
        for frame in buffer.chunks(CHANNELS) {
            for (&sample, rms_history) in frame.iter().zip(&mut self.rms_history) {
                rms_history.push(sample);
            }
        }

        for (rms, rms_history) in self.rms.iter().zip(&self.rms_history) {
            rms.store(rms_history.get(), Ordering::Relaxed);
        }
    }

    /// Lights the clip indicator, holding it for a moment after the last clipped sample.
    fn clip(&mut self, buffer: &[Sample], sample_rate: f32) {
        let clipped_now = buffer.iter().any(|sample| sample.abs() >= CLIP_THRESHOLD);

        if clipped_now {
            self.since_last_clip = 0.0;
            self.clipped.store(true, Ordering::Relaxed);
        } else {
            let elapsed = (buffer.len() / CHANNELS) as f32 / sample_rate;
            self.since_last_clip += elapsed;
            if self.since_last_clip >= CLIP_HOLD_SECS {
                self.clipped.store(false, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_of_buffer() {
        let (meter, mut processor) = audio_meter(48_000);

        processor.report(&[0.5, -0.8, 0.1, 0.2], 48_000.0);

        let reading = meter.read();
        assert_eq!(reading.peak, [0.5, 0.8]);
    }

    #[test]
    fn rms_of_constant_signal() {
        let (meter, mut processor) = audio_meter(48_000);

        let buffer = vec![0.5; 2 * 48_000];
        processor.report(&buffer, 48_000.0);

        let reading = meter.read();
        for rms in reading.rms {
            assert!((rms - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn clip_lights_and_holds() {
        let (meter, mut processor) = audio_meter(48_000);

        processor.report(&[0.0, 1.0, 0.0, 0.0], 48_000.0);
        assert!(meter.read().clipped);

        // A short quiet buffer does not yet release the hold
        processor.report(&[0.0; 512], 48_000.0);
        assert!(meter.read().clipped);

        // Half a second of silence does
        for _ in 0..100 {
            processor.report(&[0.0; 512], 48_000.0);
        }
        assert!(!meter.read().clipped);
    }
}
