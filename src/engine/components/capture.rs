use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::engine::{Sample, CHANNELS};

/// Creates a corresponding pair of [`CaptureTap`] and [`CaptureTapProcessor`].
///
/// The processor pushes the master output into a lock-free buffer holding
/// about one second of audio. If the reader falls behind, frames are dropped
/// and counted instead of blocking the audio thread.
pub fn capture_tap(sample_rate: u32) -> (CaptureTap, CaptureTapProcessor) {
    let capacity = sample_rate as usize * CHANNELS;
    let (producer, consumer) = HeapRb::new(capacity).split();

    let overruns1 = Arc::new(AtomicUsize::new(0));
    let overruns2 = Arc::clone(&overruns1);

    (
        CaptureTap {
            inner: consumer,
            overruns: overruns1,
        },
        CaptureTapProcessor {
            inner: producer,
            overruns: overruns2,
        },
    )
}

/// Acquired via the [`capture_tap`] function.
pub struct CaptureTap {
    inner: HeapCons<Sample>,
    overruns: Arc<AtomicUsize>,
}
impl CaptureTap {
    /// Move all captured samples into `out`, in interleaved stereo.
    pub fn drain_into(&mut self, out: &mut Vec<Sample>) {
        while let Some(sample) = self.inner.try_pop() {
            out.push(sample);
        }
    }

    /// Number of buffers that have (partially) been dropped because the reader fell behind.
    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Acquired via the [`capture_tap`] function.
pub struct CaptureTapProcessor {
    inner: HeapProd<Sample>,
    overruns: Arc<AtomicUsize>,
}
impl CaptureTapProcessor {
    pub fn push(&mut self, buffer: &[Sample]) {
        for &sample in buffer {
            if self.inner.try_push(sample).is_err() {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}

/// Debug recorder dumping everything pushed to it into a wav file next to the manifest.
#[cfg(feature = "record_output")]
pub struct WavRecorder {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
}
#[cfg(feature = "record_output")]
impl WavRecorder {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        const PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/recorded.wav");

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        WavRecorder {
            writer: hound::WavWriter::create(PATH, spec).unwrap(),
        }
    }

    pub fn record(&mut self, buffer: &[Sample]) {
        for &sample in buffer {
            self.writer.write_sample(sample).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_what_was_pushed() {
        let (mut tap, mut processor) = capture_tap(48_000);

        processor.push(&[0.1, 0.2, 0.3, 0.4]);

        let mut out = Vec::new();
        tap.drain_into(&mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(tap.overruns(), 0);
    }

    #[test]
    fn overrun_is_counted_not_blocking() {
        // Tiny sample rate to overflow quickly
        let (mut tap, mut processor) = capture_tap(2);

        processor.push(&[1.0, 1.0, 1.0, 1.0]);
        processor.push(&[2.0, 2.0]);

        assert_eq!(tap.overruns(), 1);

        let mut out = Vec::new();
        tap.drain_into(&mut out);
        assert_eq!(out.len(), 4);
    }
}
