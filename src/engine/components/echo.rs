use serde::{Deserialize, Serialize};

use super::eq::{Biquad, FilterKind};
use super::parameter::{f32_parameter, F32Parameter, F32ParameterProcessor};
use crate::engine::info::Info;
use crate::engine::{Sample, CHANNELS};

pub const TIME_RANGE_SECS: std::ops::RangeInclusive<f32> = 0.0..=1.0;
pub const CUTOFF_RANGE_HZ: std::ops::RangeInclusive<f32> = 200.0..=12_000.0;
/// Feedback is capped below 1.0 so the echo always dies out.
pub const FEEDBACK_MAX: f32 = 0.95;

/// Everything about the echo bus that is relevant to reconstructing it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EchoBusState {
    /// Delay time in seconds.
    pub time: f32,
    pub feedback: f32,
    /// Cutoff of the lowpass in the feedback path, in Hz.
    pub cutoff: f32,
    pub return_level: f32,
}
impl Default for EchoBusState {
    fn default() -> Self {
        Self {
            time: 0.25,
            feedback: 0.35,
            cutoff: 8_000.0,
            return_level: 0.2,
        }
    }
}

/// Creates a corresponding pair of [`EchoBus`] and [`EchoBusProcessor`].
///
/// A feedback delay with a lowpass in the feedback path, so each repeat
/// comes back a little duller than the previous one.
pub fn echo_bus(
    state: &EchoBusState,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (EchoBus, EchoBusProcessor) {
    let (time, time_processor) = f32_parameter(
        state
            .time
            .clamp(*TIME_RANGE_SECS.start(), *TIME_RANGE_SECS.end()),
        sample_rate,
        max_buffer_size,
    );
    let (feedback, feedback_processor) = f32_parameter(
        state.feedback.clamp(0.0, FEEDBACK_MAX),
        sample_rate,
        max_buffer_size,
    );
    let (cutoff, cutoff_processor) = f32_parameter(
        state
            .cutoff
            .clamp(*CUTOFF_RANGE_HZ.start(), *CUTOFF_RANGE_HZ.end()),
        sample_rate,
        max_buffer_size,
    );
    let (return_level, return_level_processor) = f32_parameter(
        state.return_level.clamp(0.0, 1.0),
        sample_rate,
        max_buffer_size,
    );

    // One second of delay line per channel, the maximum delay time
    let ring_len = sample_rate as usize + 1;

    (
        EchoBus {
            time,
            feedback,
            cutoff,
            return_level,
        },
        EchoBusProcessor {
            sample_rate,
            time: time_processor,
            feedback: feedback_processor,
            cutoff: cutoff_processor,
            return_level: return_level_processor,
            lowpass: Biquad::new(
                FilterKind::LowPass,
                sample_rate,
                state.cutoff,
                std::f32::consts::FRAC_1_SQRT_2,
            ),
            rings: std::array::from_fn(|_| vec![0.0; ring_len]),
            write_pos: 0,
            buffer: vec![0.0; max_buffer_size * CHANNELS],
        },
    )
}

/// Acquired via the [`echo_bus`] function.
pub struct EchoBus {
    time: F32Parameter,
    feedback: F32Parameter,
    cutoff: F32Parameter,
    return_level: F32Parameter,
}
impl EchoBus {
    pub fn time(&self) -> f32 {
        self.time.get()
    }
    pub fn set_time(&self, secs: f32) {
        self.time
            .set(secs.clamp(*TIME_RANGE_SECS.start(), *TIME_RANGE_SECS.end()));
    }

    pub fn feedback(&self) -> f32 {
        self.feedback.get()
    }
    pub fn set_feedback(&self, value: f32) {
        self.feedback.set(value.clamp(0.0, FEEDBACK_MAX));
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff.get()
    }
    pub fn set_cutoff(&self, hz: f32) {
        self.cutoff
            .set(hz.clamp(*CUTOFF_RANGE_HZ.start(), *CUTOFF_RANGE_HZ.end()));
    }

    pub fn return_level(&self) -> f32 {
        self.return_level.get()
    }
    pub fn set_return_level(&self, value: f32) {
        self.return_level.set(value.clamp(0.0, 1.0));
    }

    /// Takes a snapshot of the current state of the bus
    pub(crate) fn state(&self) -> EchoBusState {
        EchoBusState {
            time: self.time.get(),
            feedback: self.feedback.get(),
            cutoff: self.cutoff.get(),
            return_level: self.return_level.get(),
        }
    }
}

/// Acquired via the [`echo_bus`] function.
pub struct EchoBusProcessor {
    sample_rate: u32,

    time: F32ParameterProcessor,
    feedback: F32ParameterProcessor,
    cutoff: F32ParameterProcessor,
    return_level: F32ParameterProcessor,

    lowpass: Biquad,
    rings: [Vec<Sample>; CHANNELS],
    write_pos: usize,

    buffer: Vec<Sample>,
}
impl EchoBusProcessor {
    /// Run the delay over the (interleaved stereo) bus input, returning the scaled wet signal.
    pub fn process(&mut self, info: &Info, input: &[Sample]) -> &mut [Sample] {
        let buffer_size = info.buffer_size;
        let ring_len = self.rings[0].len();

        // Delay time and cutoff change in per-buffer steps
        let time = self.time.advance(buffer_size);
        let delay_frames = ((time * self.sample_rate as f32) as usize)
            .clamp(1, ring_len - 1);
        self.lowpass
            .set_response(self.cutoff.advance(buffer_size), 0.0);

        let feedback = self.feedback.advance(buffer_size).min(FEEDBACK_MAX);
        let return_level_buffer = self.return_level.get(buffer_size);

        let buffer = &mut self.buffer[..buffer_size * CHANNELS];
        for (frame_index, frame) in input.chunks(CHANNELS).enumerate() {
            let read_pos = (self.write_pos + ring_len - delay_frames) % ring_len;

            let mut delayed = [0.0; CHANNELS];
            for (channel, sample) in delayed.iter_mut().enumerate() {
                *sample = self.rings[channel][read_pos];
            }

            // The feedback path is filtered, the wet output is not
            let mut filtered = delayed;
            self.lowpass.process(&mut filtered);

            for channel in 0..CHANNELS {
                self.rings[channel][self.write_pos] =
                    frame[channel] + filtered[channel] * feedback;
            }
            self.write_pos = (self.write_pos + 1) % ring_len;

            let level = return_level_buffer[frame_index];
            for (channel, &sample) in delayed.iter().enumerate() {
                buffer[frame_index * CHANNELS + channel] = sample * level;
            }
        }

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48_000;
    const BUFFER_SIZE: usize = 1024;

    fn settled_processor(state: &EchoBusState) -> EchoBusProcessor {
        let (_bus, mut processor) = echo_bus(state, SAMPLE_RATE, BUFFER_SIZE);
        let info = Info::new(SAMPLE_RATE, BUFFER_SIZE);
        // Let the smoothed parameters reach their targets
        for _ in 0..3 {
            processor.process(&info, &vec![0.0; BUFFER_SIZE * CHANNELS]);
        }
        processor
    }

    #[test]
    fn repeats_after_the_delay_time() {
        let state = EchoBusState {
            // 512 frames, so both the pulse and its echo land in one buffer
            time: 512.0 / SAMPLE_RATE as f32,
            feedback: 0.0,
            cutoff: 12_000.0,
            return_level: 1.0,
        };
        let mut processor = settled_processor(&state);
        let info = Info::new(SAMPLE_RATE, BUFFER_SIZE);

        let mut input = vec![0.0; BUFFER_SIZE * CHANNELS];
        input[0] = 1.0;
        input[1] = 1.0;
        let output = processor.process(&info, &input);

        assert!(output[..512 * CHANNELS].iter().all(|&sample| sample == 0.0));
        assert!((output[512 * CHANNELS] - 1.0).abs() < 1e-6);
        assert!((output[512 * CHANNELS + 1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn feedback_produces_decaying_repeats() {
        let state = EchoBusState {
            time: 256.0 / SAMPLE_RATE as f32,
            feedback: 0.5,
            cutoff: 12_000.0,
            return_level: 1.0,
        };
        let mut processor = settled_processor(&state);
        let info = Info::new(SAMPLE_RATE, BUFFER_SIZE);

        let mut input = vec![0.0; BUFFER_SIZE * CHANNELS];
        input[0] = 1.0;
        let output = processor.process(&info, &input);

        let first = output[256 * CHANNELS].abs();
        let second = output[512 * CHANNELS].abs();
        let third = output[768 * CHANNELS].abs();
        assert!((first - 1.0).abs() < 1e-6);
        assert!(0.0 < second && second < first);
        assert!(0.0 < third && third < second);
    }

    #[test]
    fn setters_clamp() {
        let (bus, _processor) = echo_bus(&EchoBusState::default(), SAMPLE_RATE, BUFFER_SIZE);

        bus.set_feedback(3.0);
        assert_eq!(bus.feedback(), FEEDBACK_MAX);

        bus.set_time(-1.0);
        assert_eq!(bus.time(), 0.0);

        bus.set_cutoff(100_000.0);
        assert_eq!(bus.cutoff(), 12_000.0);
    }
}
