use serde::{Deserialize, Serialize};

use super::audio_meter::{audio_meter, AudioMeter, AudioMeterProcessor, MeterReading};
use super::capture::{capture_tap, CaptureTap, CaptureTapProcessor};
use super::parameter::{f32_parameter, F32Parameter, F32ParameterProcessor};
use super::spectrum::{spectrum_tap, SpectrumTap, SpectrumTapProcessor, SPECTRUM_BINS};
use crate::engine::info::Info;
use crate::engine::Sample;

pub const GAIN_RANGE: std::ops::RangeInclusive<f32> = 0.0..=3.0;

// Fixed glue compressor sitting in front of the master gain
const COMP_THRESHOLD_DB: f32 = -18.0;
const COMP_KNEE_DB: f32 = 20.0;
const COMP_RATIO: f32 = 3.0;
const COMP_ATTACK_SECS: f32 = 0.005;
const COMP_RELEASE_SECS: f32 = 0.25;

/// Everything about the master bus that is relevant to reconstructing it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MasterState {
    pub gain: f32,
}
impl Default for MasterState {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

/// Creates a corresponding pair of [`MasterBus`] and [`MasterBusProcessor`].
///
/// The master bus compresses the summed mix, applies the master gain, and
/// feeds the meter, spectrum and capture taps.
pub fn master_bus(
    state: &MasterState,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (MasterBus, MasterBusProcessor) {
    let (gain, gain_processor) = f32_parameter(
        state.gain.clamp(*GAIN_RANGE.start(), *GAIN_RANGE.end()),
        sample_rate,
        max_buffer_size,
    );
    let (meter, meter_processor) = audio_meter(sample_rate);
    let (spectrum, spectrum_processor) = spectrum_tap();
    let (capture, capture_processor) = capture_tap(sample_rate);

    (
        MasterBus {
            gain,
            meter,
            spectrum,
            capture,
        },
        MasterBusProcessor {
            gain: gain_processor,
            compressor: Compressor::new(sample_rate),
            meter: meter_processor,
            spectrum: spectrum_processor,
            capture: capture_processor,
        },
    )
}

/// Acquired via the [`master_bus`] function.
pub struct MasterBus {
    gain: F32Parameter,
    meter: AudioMeter,
    spectrum: SpectrumTap,
    capture: CaptureTap,
}
impl MasterBus {
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }
    pub fn set_gain(&self, value: f32) {
        self.gain
            .set(value.clamp(*GAIN_RANGE.start(), *GAIN_RANGE.end()));
    }

    pub fn read_meter(&self) -> MeterReading {
        self.meter.read()
    }
    pub fn read_spectrum(&self) -> [f32; SPECTRUM_BINS] {
        self.spectrum.read()
    }

    /// Move the captured master output into `out`, in interleaved stereo.
    pub fn drain_capture(&mut self, out: &mut Vec<Sample>) {
        self.capture.drain_into(out);
    }
    pub fn capture_overruns(&self) -> usize {
        self.capture.overruns()
    }

    /// Takes a snapshot of the current state of the bus
    pub(crate) fn state(&self) -> MasterState {
        MasterState {
            gain: self.gain.get(),
        }
    }
}

/// Acquired via the [`master_bus`] function.
pub struct MasterBusProcessor {
    gain: F32ParameterProcessor,
    compressor: Compressor,
    meter: AudioMeterProcessor,
    spectrum: SpectrumTapProcessor,
    capture: CaptureTapProcessor,
}
impl MasterBusProcessor {
    /// Compress and scale the summed mix in place, then feed the taps.
    pub fn process(&mut self, info: &Info, buffer: &mut [Sample]) {
        self.compressor.process(buffer);

        let gain_buffer = self.gain.get(info.buffer_size);
        for (frame, &mut gain) in buffer
            .chunks_mut(crate::engine::CHANNELS)
            .zip(gain_buffer.iter_mut())
        {
            for sample in frame {
                *sample *= gain;
            }
        }

        self.meter.report(buffer, info.sample_rate as f32);
        self.spectrum.report(buffer);
        self.capture.push(buffer);
    }
}

/// Feed-forward soft-knee compressor with fixed settings.
struct Compressor {
    attack_coefficient: f32,
    release_coefficient: f32,
    /// Smoothed signal level, linear amplitude.
    envelope: f32,
}
impl Compressor {
    fn new(sample_rate: u32) -> Self {
        Self {
            attack_coefficient: (-1.0 / (COMP_ATTACK_SECS * sample_rate as f32)).exp(),
            release_coefficient: (-1.0 / (COMP_RELEASE_SECS * sample_rate as f32)).exp(),
            envelope: 0.0,
        }
    }

    fn process(&mut self, buffer: &mut [Sample]) {
        for frame in buffer.chunks_mut(crate::engine::CHANNELS) {
            let level = frame.iter().fold(0.0_f32, |max, &sample| max.max(sample.abs()));

            let coefficient = if level > self.envelope {
                self.attack_coefficient
            } else {
                self.release_coefficient
            };
            self.envelope = coefficient * self.envelope + (1.0 - coefficient) * level;

            let gain = Self::gain_for(self.envelope);
            for sample in frame {
                *sample *= gain;
            }
        }
    }

    /// Linear gain to apply at the given envelope level.
    fn gain_for(envelope: f32) -> f32 {
        if envelope <= 0.0 {
            return 1.0;
        }
        let level_db = 20.0 * envelope.log10();

        let half_knee = COMP_KNEE_DB / 2.0;
        let reduction_db = if level_db <= COMP_THRESHOLD_DB - half_knee {
            0.0
        } else if level_db >= COMP_THRESHOLD_DB + half_knee {
            (COMP_THRESHOLD_DB - level_db) * (1.0 - 1.0 / COMP_RATIO)
        } else {
            // Quadratic interpolation through the knee
            let over = level_db - COMP_THRESHOLD_DB + half_knee;
            -(over * over) / (2.0 * COMP_KNEE_DB) * (1.0 - 1.0 / COMP_RATIO)
        };

        10.0_f32.powf(reduction_db / 20.0)
    }
}
