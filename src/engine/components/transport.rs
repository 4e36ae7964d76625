use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Smallest allowed distance between the two loop markers.
pub const MIN_LOOP_GAP_SECS: f64 = 0.05;

/// Creates a corresponding pair of [`Transport`] and [`TransportProcessor`].
///
/// Every channel of a session is driven from the processor's single playhead,
/// so stems cannot drift apart, not even across loop wraps.
pub fn transport(
    length: usize,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (Transport, TransportProcessor) {
    let playing1 = Arc::new(AtomicBool::new(false));
    let playing2 = Arc::clone(&playing1);

    let position1 = Arc::new(AtomicUsize::new(0));
    let position2 = Arc::clone(&position1);

    let min_gap = min_loop_gap(sample_rate);
    let max_segments = max_buffer_size / min_gap + 2;

    (
        Transport {
            sample_rate,
            length,
            playing: playing1,
            position: position1,
            loop_state: LoopState::default(),
        },
        TransportProcessor {
            length,
            playing: playing2,
            position: position2,
            loop_state: LoopState::default(),
            segments: Vec::with_capacity(max_segments),
        },
    )
}

fn min_loop_gap(sample_rate: u32) -> usize {
    (MIN_LOOP_GAP_SECS * f64::from(sample_rate)) as usize
}

/// Loop marker positions in frames. `start >= end` means the loop has no effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopState {
    pub enabled: bool,
    pub start: usize,
    pub end: usize,
}

/// A contiguous run of frames all channels should render in the current buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaySegment {
    pub from: usize,
    pub frames: usize,
}

/// Acquired via the [`transport`] function.
pub struct Transport {
    sample_rate: u32,
    length: usize,

    playing: Arc<AtomicBool>,
    /// Should not be mutated from here
    position: Arc<AtomicUsize>,

    // Mirror of the loop state last sent to the processor
    loop_state: LoopState,
}
impl Transport {
    pub fn play(&mut self) {
        self.playing.store(true, Ordering::Release);
    }
    pub fn pause(&mut self) {
        self.playing.store(false, Ordering::Release);
    }
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    /// Length of the session in frames (the longest stem).
    pub fn length(&self) -> usize {
        self.length
    }
    pub fn duration_secs(&self) -> f64 {
        self.length as f64 / f64::from(self.sample_rate)
    }

    /// Where the playhead currently is on the audio thread.
    ///
    /// This might have a slight delay in reacting to a jump.
    pub fn playhead_secs(&self) -> f64 {
        let position = self.position.load(Ordering::Relaxed).min(self.length);
        position as f64 / f64::from(self.sample_rate)
    }

    /// Convert a position in seconds to a frame, clamped to the session.
    pub fn frame_of_secs(&self, secs: f64) -> usize {
        let frame = (secs.max(0.0) * f64::from(self.sample_rate)) as usize;
        frame.min(self.length)
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }
    /// The loop region in seconds, if one has been set.
    pub fn loop_region_secs(&self) -> Option<(f64, f64)> {
        if self.loop_state.start >= self.loop_state.end {
            return None;
        }
        let rate = f64::from(self.sample_rate);
        Some((
            self.loop_state.start as f64 / rate,
            self.loop_state.end as f64 / rate,
        ))
    }

    /// The mutations below only change the controller's mirror;
    /// the caller is responsible for forwarding the returned state to the processor.
    #[must_use = "the new loop state must be sent to the processor"]
    pub fn set_loop_enabled(&mut self, enabled: bool) -> LoopState {
        self.loop_state.enabled = enabled;
        self.loop_state
    }

    /// Move the loop start marker, pinning it below the end marker.
    #[must_use = "the new loop state must be sent to the processor"]
    pub fn set_loop_start(&mut self, secs: f64) -> LoopState {
        let gap = min_loop_gap(self.sample_rate);
        let mut start = self.frame_of_secs(secs);
        if self.loop_state.end > 0 {
            start = start.min(self.loop_state.end.saturating_sub(gap));
        }
        self.loop_state.start = start;
        self.loop_state
    }

    /// Move the loop end marker, pinning it above the start marker.
    #[must_use = "the new loop state must be sent to the processor"]
    pub fn set_loop_end(&mut self, secs: f64) -> LoopState {
        let gap = min_loop_gap(self.sample_rate);
        let mut end = self.frame_of_secs(secs).max(self.loop_state.start + gap);
        if end > self.length {
            end = self.length;
            self.loop_state.start = end.saturating_sub(gap).min(self.loop_state.start);
        }
        self.loop_state.end = end;
        self.loop_state
    }

    /// Set both markers at once. The end marker is pinned, never rejected.
    #[must_use = "the new loop state must be sent to the processor"]
    pub fn set_loop_region(&mut self, start_secs: f64, end_secs: f64) -> LoopState {
        let gap = min_loop_gap(self.sample_rate);
        let mut start = self.frame_of_secs(start_secs);
        let mut end = self.frame_of_secs(end_secs);
        if end < start + gap {
            end = start + gap;
            if end > self.length {
                end = self.length;
                start = end.saturating_sub(gap);
            }
        }
        self.loop_state.start = start;
        self.loop_state.end = end;
        self.loop_state
    }
}

/// Acquired via the [`transport`] function.
pub struct TransportProcessor {
    length: usize,

    playing: Arc<AtomicBool>,
    position: Arc<AtomicUsize>,

    loop_state: LoopState,
    segments: Vec<PlaySegment>,
}
impl TransportProcessor {
    pub fn set_loop_state(&mut self, loop_state: LoopState) {
        self.loop_state = loop_state;
    }

    pub fn jump_to(&mut self, frame: usize) {
        self.position
            .store(frame.min(self.length), Ordering::Relaxed);
    }

    /// Advance the shared playhead by one buffer and break the buffer into
    /// the segments of the stems that every channel should render.
    ///
    /// Paused transport yields no segments, i.e. silence.
    pub fn advance(&mut self, buffer_size: usize) -> &[PlaySegment] {
        self.segments.clear();
        if !self.playing.load(Ordering::Relaxed) {
            return &self.segments;
        }

        let mut position = self.position.load(Ordering::Relaxed);
        let looping = self.loop_state.enabled && self.loop_state.start < self.loop_state.end;

        let mut remaining = buffer_size;
        while remaining > 0 {
            if looping && position >= self.loop_state.end {
                position = self.loop_state.start;
            }

            let frames = if looping && position < self.loop_state.end {
                remaining.min(self.loop_state.end - position)
            } else {
                remaining
            };

            self.segments.push(PlaySegment {
                from: position,
                frames,
            });
            position += frames;
            remaining -= frames;
        }

        if !looping {
            // The playhead rests at the end instead of running off it
            position = position.min(self.length);
        }
        self.position.store(position, Ordering::Relaxed);

        &self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48_000;
    const LENGTH: usize = 10 * 48_000;

    #[test]
    fn paused_yields_no_segments() {
        let (_transport, mut processor) = transport(LENGTH, SAMPLE_RATE, 1024);

        assert!(processor.advance(1024).is_empty());
    }

    #[test]
    fn playing_advances_contiguously() {
        let (mut transport, mut processor) = transport(LENGTH, SAMPLE_RATE, 1024);
        transport.play();

        let segments = processor.advance(1024).to_vec();
        assert_eq!(
            segments,
            vec![PlaySegment {
                from: 0,
                frames: 1024
            }]
        );

        let segments = processor.advance(512).to_vec();
        assert_eq!(
            segments,
            vec![PlaySegment {
                from: 1024,
                frames: 512
            }]
        );
    }

    #[test]
    fn loop_wrap_splits_the_buffer() {
        let (mut transport, mut processor) = transport(LENGTH, SAMPLE_RATE, 1024);
        let loop_state = transport.set_loop_region(0.0, 1.0);
        processor.set_loop_state(loop_state);
        let _ = transport.set_loop_enabled(true);
        processor.set_loop_state(transport.loop_state());

        transport.play();
        processor.jump_to(48_000 - 100);

        let segments = processor.advance(1024).to_vec();
        assert_eq!(
            segments,
            vec![
                PlaySegment {
                    from: 48_000 - 100,
                    frames: 100
                },
                PlaySegment {
                    from: 0,
                    frames: 924
                },
            ]
        );
    }

    #[test]
    fn loop_wraps_to_the_loop_start() {
        let (mut transport, mut processor) = transport(30 * 48_000, SAMPLE_RATE, 1024);
        let loop_state = transport.set_loop_region(10.0, 20.0);
        processor.set_loop_state(loop_state);
        processor.set_loop_state(transport.set_loop_enabled(true));

        transport.play();
        processor.jump_to(20 * 48_000 - 100);

        // Playing past the loop end lands at the loop start, not at zero
        let segments = processor.advance(1024).to_vec();
        assert_eq!(
            segments,
            vec![
                PlaySegment {
                    from: 20 * 48_000 - 100,
                    frames: 100
                },
                PlaySegment {
                    from: 10 * 48_000,
                    frames: 924
                },
            ]
        );
        assert_eq!(
            transport.playhead_secs(),
            (10 * 48_000 + 924) as f64 / f64::from(SAMPLE_RATE)
        );
    }

    #[test]
    fn playhead_rests_at_the_end() {
        let (mut transport, mut processor) = transport(1000, SAMPLE_RATE, 1024);
        transport.play();
        processor.jump_to(900);

        let segments = processor.advance(1024).to_vec();
        assert_eq!(
            segments,
            vec![PlaySegment {
                from: 900,
                frames: 1024
            }]
        );
        assert_eq!(transport.playhead_secs(), 1000.0 / f64::from(SAMPLE_RATE));

        // Subsequent buffers render silence from past the end
        let segments = processor.advance(1024).to_vec();
        assert_eq!(
            segments,
            vec![PlaySegment {
                from: 1000,
                frames: 1024
            }]
        );
    }

    #[test]
    fn jump_is_clamped_to_length() {
        let (transport, mut processor) = transport(1000, SAMPLE_RATE, 1024);

        processor.jump_to(5000);

        assert_eq!(transport.playhead_secs(), 1000.0 / f64::from(SAMPLE_RATE));
    }

    #[test]
    fn loop_markers_keep_min_gap() {
        let (mut transport, _processor) = transport(LENGTH, SAMPLE_RATE, 1024);

        let state = transport.set_loop_region(2.0, 2.01);
        assert_eq!(state.start, 2 * 48_000);
        assert_eq!(state.end, 2 * 48_000 + min_loop_gap(SAMPLE_RATE));
    }

    #[test]
    fn loop_start_pinned_below_end() {
        let (mut transport, _processor) = transport(LENGTH, SAMPLE_RATE, 1024);

        let _ = transport.set_loop_region(1.0, 2.0);
        let state = transport.set_loop_start(5.0);

        assert_eq!(state.end, 2 * 48_000);
        assert_eq!(state.start, 2 * 48_000 - min_loop_gap(SAMPLE_RATE));
    }

    #[test]
    fn loop_end_clamped_to_duration() {
        let (mut transport, _processor) = transport(LENGTH, SAMPLE_RATE, 1024);

        let state = transport.set_loop_region(9.99, 60.0);

        assert_eq!(state.end, LENGTH);
        assert_eq!(state.start, LENGTH - min_loop_gap(SAMPLE_RATE));
    }
}
