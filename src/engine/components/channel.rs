use serde::{Deserialize, Serialize};
use std::iter::zip;
use std::ops::RangeInclusive;
use std::sync::Arc;

use super::audio_meter::{audio_meter, AudioMeter, AudioMeterProcessor, MeterReading};
use super::eq::{Biquad, FilterKind};
use super::parameter::{f32_parameter, F32Parameter, F32ParameterProcessor};
use super::stem::StemBuffer;
use super::transport::PlaySegment;
use crate::engine::info::Info;
use crate::engine::{Sample, CHANNELS};

/// Corner frequency of the low shelf band.
const LOW_SHELF_HZ: f32 = 200.0;
/// Corner frequency of the high shelf band.
const HIGH_SHELF_HZ: f32 = 3000.0;
/// Width of the sweepable mid band.
const MID_Q: f32 = 0.8;

/// The user-controllable parameters of a single channel strip, in processing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelParam {
    /// Input trim before the EQ.
    PreGain,
    /// Low shelf gain in dB.
    LowGain,
    /// Peaking mid gain in dB.
    MidGain,
    /// High shelf gain in dB.
    HighGain,
    /// Center frequency of the mid band in Hz.
    MidFreq,
    /// Stereo position, -1 (left) to 1 (right).
    Pan,
    /// Post-pan send into the reverb bus.
    SendA,
    /// Post-pan send into the echo bus.
    SendB,
    /// The channel fader. Applied together with the solo/mute policy.
    Fader,
}
impl ChannelParam {
    pub fn range(self) -> RangeInclusive<f32> {
        match self {
            Self::PreGain => 0.0..=3.0,
            Self::LowGain => -15.0..=15.0,
            Self::MidGain => -12.0..=12.0,
            Self::HighGain => -15.0..=15.0,
            Self::MidFreq => 500.0..=4000.0,
            Self::Pan => -1.0..=1.0,
            Self::SendA => 0.0..=1.0,
            Self::SendB => 0.0..=1.0,
            Self::Fader => 0.0..=3.0,
        }
    }

    pub fn default_value(self) -> f32 {
        match self {
            Self::PreGain => 1.0,
            Self::LowGain | Self::MidGain | Self::HighGain => 0.0,
            Self::MidFreq => 1000.0,
            Self::Pan => 0.0,
            Self::SendA | Self::SendB => 0.0,
            Self::Fader => 1.0,
        }
    }

    pub fn clamp(self, value: f32) -> f32 {
        let range = self.range();
        value.clamp(*range.start(), *range.end())
    }
}

/// Everything about a channel strip that is relevant to reconstructing it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub pre_gain: f32,
    pub low_gain: f32,
    pub mid_gain: f32,
    pub high_gain: f32,
    pub mid_freq: f32,
    pub pan: f32,
    pub send_a: f32,
    pub send_b: f32,
    pub fader: f32,
    pub mute: bool,
    pub solo: bool,
}
impl Default for ChannelState {
    fn default() -> Self {
        Self {
            pre_gain: ChannelParam::PreGain.default_value(),
            low_gain: ChannelParam::LowGain.default_value(),
            mid_gain: ChannelParam::MidGain.default_value(),
            high_gain: ChannelParam::HighGain.default_value(),
            mid_freq: ChannelParam::MidFreq.default_value(),
            pan: ChannelParam::Pan.default_value(),
            send_a: ChannelParam::SendA.default_value(),
            send_b: ChannelParam::SendB.default_value(),
            fader: ChannelParam::Fader.default_value(),
            mute: false,
            solo: false,
        }
    }
}

/// Creates a corresponding pair of [`ChannelStrip`] and [`ChannelStripProcessor`] playing `stem`.
///
/// The [`ChannelStripProcessor`] should live on the audio thread, while the [`ChannelStrip`] should not.
pub fn channel_strip(
    stem: Arc<StemBuffer>,
    state: &ChannelState,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (ChannelStrip, ChannelStripProcessor) {
    let (pre_gain, pre_gain_processor) = f32_parameter(state.pre_gain, sample_rate, max_buffer_size);
    let (low_gain, low_gain_processor) = f32_parameter(state.low_gain, sample_rate, max_buffer_size);
    let (mid_gain, mid_gain_processor) = f32_parameter(state.mid_gain, sample_rate, max_buffer_size);
    let (high_gain, high_gain_processor) =
        f32_parameter(state.high_gain, sample_rate, max_buffer_size);
    let (mid_freq, mid_freq_processor) = f32_parameter(state.mid_freq, sample_rate, max_buffer_size);
    let (pan, pan_processor) = f32_parameter(state.pan, sample_rate, max_buffer_size);
    let (send_a, send_a_processor) = f32_parameter(state.send_a, sample_rate, max_buffer_size);
    let (send_b, send_b_processor) = f32_parameter(state.send_b, sample_rate, max_buffer_size);

    // The processor never sees the bare fader, only the policy-resolved output level.
    let initial_level = if state.mute { 0.0 } else { state.fader };
    let (output_level, output_level_processor) =
        f32_parameter(initial_level, sample_rate, max_buffer_size);

    let (meter, meter_processor) = audio_meter(sample_rate);

    (
        ChannelStrip {
            pre_gain,
            low_gain,
            mid_gain,
            high_gain,
            mid_freq,
            pan,
            send_a,
            send_b,
            fader: state.fader,
            mute: state.mute,
            solo: state.solo,
            output_level,
            meter,
        },
        ChannelStripProcessor {
            stem,
            buffer: vec![0.0; max_buffer_size * CHANNELS],

            pre_gain: pre_gain_processor,
            low_gain: low_gain_processor,
            mid_gain: mid_gain_processor,
            high_gain: high_gain_processor,
            mid_freq: mid_freq_processor,
            pan: pan_processor,
            send_a: send_a_processor,
            send_b: send_b_processor,
            output_level: output_level_processor,

            low: Biquad::new(FilterKind::LowShelf, sample_rate, LOW_SHELF_HZ, 1.0),
            mid: Biquad::new(FilterKind::Peaking, sample_rate, state.mid_freq, MID_Q),
            high: Biquad::new(FilterKind::HighShelf, sample_rate, HIGH_SHELF_HZ, 1.0),

            meter: meter_processor,
        },
    )
}

/// Acquired via the [`channel_strip`] function.
pub struct ChannelStrip {
    pre_gain: F32Parameter,
    low_gain: F32Parameter,
    mid_gain: F32Parameter,
    high_gain: F32Parameter,
    mid_freq: F32Parameter,
    pan: F32Parameter,
    send_a: F32Parameter,
    send_b: F32Parameter,

    // Controller-side only; resolved into `output_level` by the session's policy pass
    fader: f32,
    mute: bool,
    solo: bool,
    output_level: F32Parameter,

    meter: AudioMeter,
}
impl ChannelStrip {
    /// Set a parameter, clamped to its range. Returns the value that was applied.
    ///
    /// Setting [`ChannelParam::Fader`] only updates the controller's mirror;
    /// the session must rerun its solo/mute policy for it to become audible.
    pub fn set(&mut self, param: ChannelParam, value: f32) -> f32 {
        let value = param.clamp(value);
        match param {
            ChannelParam::PreGain => self.pre_gain.set(value),
            ChannelParam::LowGain => self.low_gain.set(value),
            ChannelParam::MidGain => self.mid_gain.set(value),
            ChannelParam::HighGain => self.high_gain.set(value),
            ChannelParam::MidFreq => self.mid_freq.set(value),
            ChannelParam::Pan => self.pan.set(value),
            ChannelParam::SendA => self.send_a.set(value),
            ChannelParam::SendB => self.send_b.set(value),
            ChannelParam::Fader => self.fader = value,
        }
        value
    }

    pub fn get(&self, param: ChannelParam) -> f32 {
        match param {
            ChannelParam::PreGain => self.pre_gain.get(),
            ChannelParam::LowGain => self.low_gain.get(),
            ChannelParam::MidGain => self.mid_gain.get(),
            ChannelParam::HighGain => self.high_gain.get(),
            ChannelParam::MidFreq => self.mid_freq.get(),
            ChannelParam::Pan => self.pan.get(),
            ChannelParam::SendA => self.send_a.get(),
            ChannelParam::SendB => self.send_b.get(),
            ChannelParam::Fader => self.fader,
        }
    }

    pub fn mute(&self) -> bool {
        self.mute
    }
    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }
    pub fn solo(&self) -> bool {
        self.solo
    }
    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }
    pub fn fader(&self) -> f32 {
        self.fader
    }

    /// Push the policy-resolved output level to the audio thread.
    pub(crate) fn apply_output_level(&self, level: f32) {
        self.output_level.set(level);
    }

    pub fn read_meter(&self) -> MeterReading {
        self.meter.read()
    }

    /// Takes a snapshot of the current state of the channel
    pub(crate) fn state(&self) -> ChannelState {
        ChannelState {
            pre_gain: self.pre_gain.get(),
            low_gain: self.low_gain.get(),
            mid_gain: self.mid_gain.get(),
            high_gain: self.high_gain.get(),
            mid_freq: self.mid_freq.get(),
            pan: self.pan.get(),
            send_a: self.send_a.get(),
            send_b: self.send_b.get(),
            fader: self.fader,
            mute: self.mute,
            solo: self.solo,
        }
    }

    /// Write a full state back, clamped. Does not rerun the solo/mute policy.
    pub(crate) fn apply_state(&mut self, state: &ChannelState) {
        self.set(ChannelParam::PreGain, state.pre_gain);
        self.set(ChannelParam::LowGain, state.low_gain);
        self.set(ChannelParam::MidGain, state.mid_gain);
        self.set(ChannelParam::HighGain, state.high_gain);
        self.set(ChannelParam::MidFreq, state.mid_freq);
        self.set(ChannelParam::Pan, state.pan);
        self.set(ChannelParam::SendA, state.send_a);
        self.set(ChannelParam::SendB, state.send_b);
        self.set(ChannelParam::Fader, state.fader);
        self.mute = state.mute;
        self.solo = state.solo;
    }
}

/// Acquired via the [`channel_strip`] function.
pub struct ChannelStripProcessor {
    stem: Arc<StemBuffer>,
    buffer: Vec<Sample>,

    pre_gain: F32ParameterProcessor,
    low_gain: F32ParameterProcessor,
    mid_gain: F32ParameterProcessor,
    high_gain: F32ParameterProcessor,
    mid_freq: F32ParameterProcessor,
    pan: F32ParameterProcessor,
    send_a: F32ParameterProcessor,
    send_b: F32ParameterProcessor,
    output_level: F32ParameterProcessor,

    low: Biquad,
    mid: Biquad,
    high: Biquad,

    meter: AudioMeterProcessor,
}
impl ChannelStripProcessor {
    fn pan(panning: f32, frame: &mut [Sample]) {
        let left_multiplier = (-panning + 1.0).clamp(0.0, 1.0);
        frame[0] *= left_multiplier;

        let right_multiplier = (panning + 1.0).clamp(0.0, 1.0);
        frame[1] *= right_multiplier;
    }

    /// Render this channel for the segments of the current buffer.
    ///
    /// The post-pan signal is accumulated into `send_a_bus`/`send_b_bus`
    /// scaled by the send levels; the returned buffer carries the
    /// post-fader signal for the master sum.
    pub fn process(
        &mut self,
        info: &Info,
        segments: &[PlaySegment],
        send_a_bus: &mut [Sample],
        send_b_bus: &mut [Sample],
    ) -> &mut [Sample] {
        let Info {
            sample_rate,
            buffer_size,
        } = *info;

        let buffer = &mut self.buffer[..buffer_size * CHANNELS];

        // Pull the stem segments into the working buffer; a paused transport yields none
        let mut written = 0;
        for segment in segments {
            let sample_count = segment.frames * CHANNELS;
            self.stem
                .fill_from(segment.from, &mut buffer[written..written + sample_count]);
            written += sample_count;
        }
        buffer[written..].fill(0.0);

        // Pre-gain
        let pre_gain_buffer = self.pre_gain.get(buffer_size);
        for (frame, &mut gain) in zip(buffer.chunks_mut(CHANNELS), pre_gain_buffer.iter_mut()) {
            for sample in frame {
                *sample *= gain;
            }
        }

        // EQ coefficients follow the smoothed parameters once per buffer
        self.low
            .set_response(LOW_SHELF_HZ, self.low_gain.advance(buffer_size));
        self.mid.set_response(
            self.mid_freq.advance(buffer_size),
            self.mid_gain.advance(buffer_size),
        );
        self.high
            .set_response(HIGH_SHELF_HZ, self.high_gain.advance(buffer_size));
        self.low.process(buffer);
        self.mid.process(buffer);
        self.high.process(buffer);

        // Pan
        let pan_buffer = self.pan.get(buffer_size);
        for (frame, &mut panning) in zip(buffer.chunks_mut(CHANNELS), pan_buffer.iter_mut()) {
            Self::pan(panning, frame);
        }

        // Post-pan, pre-fader send taps
        let send_a_buffer = self.send_a.get(buffer_size);
        for ((frame, bus_frame), &mut send) in zip(
            zip(buffer.chunks(CHANNELS), send_a_bus.chunks_mut(CHANNELS)),
            send_a_buffer.iter_mut(),
        ) {
            for (sample, bus_sample) in zip(frame, bus_frame) {
                *bus_sample += sample * send;
            }
        }
        let send_b_buffer = self.send_b.get(buffer_size);
        for ((frame, bus_frame), &mut send) in zip(
            zip(buffer.chunks(CHANNELS), send_b_bus.chunks_mut(CHANNELS)),
            send_b_buffer.iter_mut(),
        ) {
            for (sample, bus_sample) in zip(frame, bus_frame) {
                *bus_sample += sample * send;
            }
        }

        // Policy-resolved fader
        let level_buffer = self.output_level.get(buffer_size);
        for (frame, &mut level) in zip(buffer.chunks_mut(CHANNELS), level_buffer.iter_mut()) {
            for sample in frame {
                *sample *= level;
            }
        }

        self.meter.report(buffer, sample_rate as f32);

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_stem(value: Sample, frames: usize) -> Arc<StemBuffer> {
        let mut stem_frames = Vec::with_capacity(frames * CHANNELS);
        for _ in 0..frames {
            stem_frames.push(value);
            stem_frames.push(value);
        }
        Arc::new(StemBuffer::from_frames(stem_frames, 48_000))
    }

    fn process_settled(
        processor: &mut ChannelStripProcessor,
        segments: &[PlaySegment],
    ) -> (Vec<Sample>, Vec<Sample>, Vec<Sample>) {
        let info = Info::new(48_000, 1024);
        let mut send_a = vec![0.0; 1024 * CHANNELS];
        let mut send_b = vec![0.0; 1024 * CHANNELS];

        // Run a couple of buffers so parameter ramps have settled
        for _ in 0..3 {
            send_a.fill(0.0);
            send_b.fill(0.0);
            processor.process(&info, segments, &mut send_a, &mut send_b);
        }
        send_a.fill(0.0);
        send_b.fill(0.0);
        let out = processor
            .process(&info, segments, &mut send_a, &mut send_b)
            .to_vec();
        (out, send_a, send_b)
    }

    #[test]
    fn no_segments_means_silence() {
        let stem = constant_stem(0.5, 48_000);
        let (_strip, mut processor) =
            channel_strip(stem, &ChannelState::default(), 48_000, 1024);

        let (out, send_a, send_b) = process_settled(&mut processor, &[]);

        assert!(out.iter().all(|&sample| sample == 0.0));
        assert!(send_a.iter().all(|&sample| sample == 0.0));
        assert!(send_b.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn pre_gain_scales_the_stem() {
        let stem = constant_stem(0.25, 48_000);
        let state = ChannelState {
            pre_gain: 2.0,
            ..Default::default()
        };
        let (_strip, mut processor) = channel_strip(stem, &state, 48_000, 1024);

        let segments = [PlaySegment {
            from: 1000,
            frames: 1024,
        }];
        let (out, _, _) = process_settled(&mut processor, &segments);

        // Flat EQ should leave the constant signal at pre_gain * 0.25
        let last = *out.last().unwrap();
        assert!((last - 0.5).abs() < 0.05);
    }

    #[test]
    fn sends_tap_post_pan_pre_fader() {
        let stem = constant_stem(0.5, 48_000);
        let state = ChannelState {
            send_a: 1.0,
            fader: 0.0,
            ..Default::default()
        };
        let (strip, mut processor) = channel_strip(stem, &state, 48_000, 1024);
        strip.apply_output_level(0.0);

        let segments = [PlaySegment {
            from: 0,
            frames: 1024,
        }];
        let (out, send_a, send_b) = process_settled(&mut processor, &segments);

        // Output is silenced by the fader, but the send still carries signal
        assert!(out.iter().all(|&sample| sample.abs() < 1e-3));
        assert!(send_a.last().unwrap().abs() > 0.3);
        assert!(send_b.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn hard_pan_left_empties_right_channel() {
        let stem = constant_stem(0.5, 48_000);
        let state = ChannelState {
            pan: -1.0,
            ..Default::default()
        };
        let (_strip, mut processor) = channel_strip(stem, &state, 48_000, 1024);

        let segments = [PlaySegment {
            from: 0,
            frames: 1024,
        }];
        let (out, _, _) = process_settled(&mut processor, &segments);

        let left = out[out.len() - 2];
        let right = out[out.len() - 1];
        assert!(left.abs() > 0.3);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn set_clamps_to_range() {
        let stem = constant_stem(0.0, 16);
        let (mut strip, _processor) =
            channel_strip(stem, &ChannelState::default(), 48_000, 1024);

        let applied = strip.set(ChannelParam::Fader, 100.0);
        assert_eq!(applied, 3.0);
        assert_eq!(strip.get(ChannelParam::Fader), 3.0);

        let applied = strip.set(ChannelParam::MidGain, -100.0);
        assert_eq!(applied, -12.0);
    }
}
