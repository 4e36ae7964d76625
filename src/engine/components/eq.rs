use std::f32::consts::PI;

use crate::engine::{Sample, CHANNELS};

/// Filter shapes needed by the channel strips and the echo bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    LowShelf,
    Peaking,
    HighShelf,
    LowPass,
}

/// Stereo biquad filter (direct form 1), with coefficients from the
/// Audio EQ Cookbook.
///
/// Frequency and gain can be retuned while running;
/// coefficients are only recomputed when they actually change.
pub struct Biquad {
    kind: FilterKind,
    sample_rate: f32,
    q: f32,

    frequency: f32,
    gain_db: f32,

    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    x1: [Sample; CHANNELS],
    x2: [Sample; CHANNELS],
    y1: [Sample; CHANNELS],
    y2: [Sample; CHANNELS],
}
impl Biquad {
    pub fn new(kind: FilterKind, sample_rate: u32, frequency: f32, q: f32) -> Self {
        let mut filter = Self {
            kind,
            sample_rate: sample_rate as f32,
            q,

            frequency,
            gain_db: 0.0,

            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,

            x1: [0.0; CHANNELS],
            x2: [0.0; CHANNELS],
            y1: [0.0; CHANNELS],
            y2: [0.0; CHANNELS],
        };
        filter.update_coefficients();
        filter
    }

    /// Retune the filter. A no-op if neither value changed since last time.
    pub fn set_response(&mut self, frequency: f32, gain_db: f32) {
        let unchanged = self.frequency == frequency && self.gain_db == gain_db;
        if unchanged {
            return;
        }

        self.frequency = frequency;
        self.gain_db = gain_db;
        self.update_coefficients();
    }

    fn update_coefficients(&mut self) {
        // Keep the center frequency meaningfully below Nyquist
        let frequency = self.frequency.clamp(1.0, 0.45 * self.sample_rate);

        let a = 10.0_f32.powf(self.gain_db / 40.0);
        let w0 = 2.0 * PI * frequency / self.sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * self.q);

        let (b0, b1, b2, a0, a1, a2) = match self.kind {
            FilterKind::LowShelf => {
                let two_root_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_root_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_root_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_root_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_root_a_alpha,
                )
            }
            FilterKind::HighShelf => {
                let two_root_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_root_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_root_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_root_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_root_a_alpha,
                )
            }
            FilterKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterKind::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Filter the interleaved stereo buffer in place.
    pub fn process(&mut self, buffer: &mut [Sample]) {
        for frame in buffer.chunks_mut(CHANNELS) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let x0 = *sample;
                let y0 = self.b0 * x0 + self.b1 * self.x1[channel] + self.b2 * self.x2[channel]
                    - self.a1 * self.y1[channel]
                    - self.a2 * self.y2[channel];

                self.x2[channel] = self.x1[channel];
                self.x1[channel] = x0;
                self.y2[channel] = self.y1[channel];
                self.y1[channel] = y0;

                *sample = y0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48_000;

    fn magnitude_at(filter: &mut Biquad, frequency: f32) -> f32 {
        // Feed a sine through the filter and measure the response after it settles.
        let length = SAMPLE_RATE as usize;
        let mut buffer = vec![0.0; length * CHANNELS];
        for (i, frame) in buffer.chunks_mut(CHANNELS).enumerate() {
            let value = (2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32).sin();
            for sample in frame {
                *sample = value;
            }
        }

        filter.process(&mut buffer);

        buffer[buffer.len() / 2..]
            .iter()
            .fold(0.0_f32, |max, &sample| max.max(sample.abs()))
    }

    #[test]
    fn flat_shelf_passes_through() {
        let mut filter = Biquad::new(FilterKind::LowShelf, SAMPLE_RATE, 200.0, 1.0);
        filter.set_response(200.0, 0.0);

        let magnitude = magnitude_at(&mut filter, 100.0);
        assert!((magnitude - 1.0).abs() < 0.01);
    }

    #[test]
    fn low_shelf_boosts_low_frequencies() {
        let mut filter = Biquad::new(FilterKind::LowShelf, SAMPLE_RATE, 200.0, 1.0);
        filter.set_response(200.0, 15.0);

        let low = magnitude_at(&mut filter, 50.0);
        // +15 dB is a factor of ~5.6
        assert!(low > 4.0);

        let mut filter = Biquad::new(FilterKind::LowShelf, SAMPLE_RATE, 200.0, 1.0);
        filter.set_response(200.0, 15.0);
        let high = magnitude_at(&mut filter, 10_000.0);
        assert!((high - 1.0).abs() < 0.1);
    }

    #[test]
    fn peaking_cut_attenuates_center() {
        let mut filter = Biquad::new(FilterKind::Peaking, SAMPLE_RATE, 1000.0, 0.8);
        filter.set_response(1000.0, -12.0);

        let center = magnitude_at(&mut filter, 1000.0);
        // -12 dB is a factor of ~0.25
        assert!(center < 0.3);
    }

    #[test]
    fn low_pass_attenuates_above_cutoff() {
        let mut filter = Biquad::new(FilterKind::LowPass, SAMPLE_RATE, 1000.0, 0.707);

        let high = magnitude_at(&mut filter, 8000.0);
        assert!(high < 0.1);

        let mut filter = Biquad::new(FilterKind::LowPass, SAMPLE_RATE, 1000.0, 0.707);
        let low = magnitude_at(&mut filter, 100.0);
        assert!((low - 1.0).abs() < 0.05);
    }
}
