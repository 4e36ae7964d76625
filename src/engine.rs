use core::sync::atomic::Ordering;
use std::error::Error;
use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

mod components;
pub mod config;
pub mod error;
mod info;
mod processor;
mod session;
mod snapshot;
mod utils;

use crate::engine::utils::dropper::DBox;
use crate::engine::utils::panic_msg;

pub use components::audio_meter::MeterReading;
pub use components::channel::{ChannelParam, ChannelState};
pub use components::echo::{EchoBusState, CUTOFF_RANGE_HZ, FEEDBACK_MAX, TIME_RANGE_SECS};
pub use components::master::{MasterState, GAIN_RANGE};
pub use components::reverb::{ReverbBusState, SIZE_RANGE_SECS};
pub use components::spectrum::SPECTRUM_BINS;
pub use components::stem::StemImportError;
pub use components::transport::MIN_LOOP_GAP_SECS;
pub use processor::Processor;
pub use session::{SongDescriptor, SongInfo, StemLoadError, StemSource, UnknownChannelError};
pub use snapshot::{MixSnapshot, SnapshotIoError, SnapshotStore};

use config::Config;
use processor::{processor, Event, ProcessorInterface};
use session::{mix_session, MixSession};

/// Internally used sample format.
type Sample = f32;
/// Internally used channel count.
const CHANNELS: usize = 2;
/// Biggest possible requested buffer size.
const MAX_BUFFER_SIZE_DEFAULT: usize = 1056;
// CHANNELS and MAX_BUFFER_SIZE_DEFAULT are both usize, because they are mostly used for initializing and indexing Vec's.

struct StartedStream {
    stopped_flag: Arc<AtomicBool>,
    join_handle: JoinHandle<()>,
    interface: ProcessorInterface,
}

/// A mixing console for songs split into stems.
///
/// One song is loaded at a time; each of its stems plays through a channel
/// strip, into two shared effect buses and a master bus.
pub struct Engine {
    /// Signal whether the stream should stop.
    stopped: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,

    config: Config,
    sample_rate: u32,
    max_buffer_size: usize,

    interface: ProcessorInterface,
    session: Option<MixSession>,
    snapshots: SnapshotStore,
}
impl Engine {
    /// Create an engine with no song loaded, playing through the default output device.
    pub fn empty() -> Self {
        Engine::new(Config::default()).expect("Failed to create empty engine")
    }

    /// Create an engine playing through the device described by `config`.
    pub fn new(config: Config) -> Result<Self, InvalidConfigError> {
        let StartedStream {
            stopped_flag,
            join_handle,
            interface,
        } = Self::start_stream(&config)?;

        Ok(Engine {
            stopped: stopped_flag,
            join_handle: Some(join_handle),
            sample_rate: config.output_config.sample_rate,
            max_buffer_size: max_buffer_size_of(&config),
            config,
            interface,
            session: None,
            snapshots: SnapshotStore::new(),
        })
    }

    /// Starts a stream with the given config.
    fn start_stream(config: &Config) -> Result<StartedStream, InvalidConfigError> {
        let device = config.output_device.clone();
        let output_config = config.output_config.clone();
        let stream_config = cpal::StreamConfig {
            channels: output_config.channels,
            sample_rate: cpal::SampleRate(output_config.sample_rate),
            buffer_size: match output_config.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        // Since buffer sizes can vary from output to output,
        // `max_buffer_size` denotes how much space each intermediate buffer should be initialized with (per channel).
        let max_buffer_size = max_buffer_size_of(config);
        let (interface, processor) = processor(output_config.sample_rate, max_buffer_size);

        use config::SampleFormat as S;
        let create_stream = match output_config.sample_format {
            S::I8 => Self::create_stream_of_type::<i8>,
            S::I16 => Self::create_stream_of_type::<i16>,
            S::I32 => Self::create_stream_of_type::<i32>,
            S::I64 => Self::create_stream_of_type::<i64>,
            S::U8 => Self::create_stream_of_type::<u8>,
            S::U16 => Self::create_stream_of_type::<u16>,
            S::U32 => Self::create_stream_of_type::<u32>,
            S::U64 => Self::create_stream_of_type::<u64>,
            S::F32 => Self::create_stream_of_type::<f32>,
            S::F64 => Self::create_stream_of_type::<f64>,
        };

        let (tx, rx) = sync_channel(1);

        let stopped1 = Arc::new(AtomicBool::new(false));
        let stopped2 = Arc::clone(&stopped1);
        let join_handle = thread::spawn(move || {
            // Since cpal::Stream doesn't implement the Send trait, it has to live in this thread.

            let raw_device = match device.raw() {
                Ok(raw_device) => raw_device,
                Err(_) => {
                    tx.send(Some(InvalidConfigError::DeviceNotAvailable)).unwrap();
                    return;
                }
            };
            let stream = match create_stream(&raw_device, &stream_config, processor) {
                Ok(stream) => {
                    tx.send(None).unwrap();
                    stream
                }
                Err(e) => {
                    tx.send(Some(e)).unwrap();
                    return;
                }
            };

            stream.play().unwrap();

            println!(
                "Host: {}\nDevice: {}\nChannels: {}\nSample format: {}\nSample rate: {}\nBuffer size: {}",
                device.host().name(),
                device.name(),
                output_config.channels,
                output_config.sample_format,
                output_config.sample_rate,
                output_config.buffer_size.map(|s| s.to_string()).unwrap_or("Default".into()),
            );

            while !stopped2.load(Ordering::Acquire) {
                // Parking the thread is more efficient than spinning, but can risk unparking seemingly randomly, hence the 'stopped' flag.
                thread::park();
            }

            // Just to be explicit
            drop(stream);
            println!("Stream terminated");
        });

        let res = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("Attempt to start stream timed out");

        match res {
            Some(e) => Err(e),
            None => Ok(StartedStream {
                stopped_flag: stopped1,
                join_handle,
                interface,
            }),
        }
    }

    /// Create a cpal stream with the given sample type.
    fn create_stream_of_type<T: 'static + cpal::SizedSample + cpal::FromSample<Sample>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut processor: Processor,
    ) -> Result<cpal::Stream, InvalidConfigError> {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| {
                    processor.poll();
                    processor.output(data);
                },
                |err| panic!("{err}"),
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    InvalidConfigError::DeviceNotAvailable
                }
                cpal::BuildStreamError::StreamConfigNotSupported => InvalidConfigError::Other,
                cpal::BuildStreamError::InvalidArgument => InvalidConfigError::Other,

                e => panic!("Stream could not be created: {e}"),
            })
    }

    /// Creates an engine that simulates outputting without outputting to any audio device.
    ///
    /// Spins poll and output callback as fast as possible with a varying buffersize.
    ///
    /// Useful for integration testing.
    #[doc(hidden)]
    pub fn dummy() -> Self {
        let config = Config::dummy();
        let (interface, mut processor) = processor(config.output_config.sample_rate, 1024);

        let mut data = vec![0.0; 2048];

        let stopped1 = Arc::new(AtomicBool::new(false));
        let stopped2 = Arc::clone(&stopped1);
        let join_handle = thread::spawn(move || {
            while !stopped2.load(Ordering::Acquire) {
                let data = &mut data[..];
                processor.poll();
                processor.output(data);

                let data = &mut data[..1024];
                processor.poll();
                processor.output(data);
            }
        });

        Engine {
            stopped: stopped1,
            join_handle: Some(join_handle),
            sample_rate: config.output_config.sample_rate,
            max_buffer_size: 1024,
            config,
            interface,
            session: None,
            snapshots: SnapshotStore::new(),
        }
    }

    /// Creates an engine that simulates outputting without outputting to any audio device,
    /// while returning the processor to be polled and output manually.
    ///
    /// Useful for testing and benchmarking.
    #[doc(hidden)]
    pub fn dummy_with_processor() -> (Self, Processor) {
        let config = Config::dummy();
        let (interface, processor) = processor(config.output_config.sample_rate, 1024);

        let engine = Engine {
            stopped: Arc::new(AtomicBool::new(false)),
            join_handle: None,
            sample_rate: config.output_config.sample_rate,
            max_buffer_size: 1024,
            config,
            interface,
            session: None,
            snapshots: SnapshotStore::new(),
        };

        (engine, processor)
    }

    /// Stops the stream if it is running.
    fn stop_stream(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(h) = self.join_handle.take() {
            h.thread().unpark();
            let r = h.join();
            if let Err(e) = r {
                let s = panic_msg(e);
                panic!("Failed to terminate stream: {s}");
            }
        }
    }

    /// Get the config that is currently in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load a song, replacing whatever was loaded before.
    ///
    /// Stems that fail to import are returned; the song still loads with the
    /// stems that could be read. Mixer settings survive the song change.
    pub fn load_song(&mut self, song: &SongDescriptor) -> Vec<StemLoadError> {
        let (mut session, session_processor, errors) =
            mix_session(song, self.sample_rate, self.max_buffer_size);
        session.refresh_levels();

        self.interface
            .send(Event::ReplaceSession(Some(DBox::new(session_processor))));
        self.session = Some(session);

        errors
    }

    /// Unload the current song, leaving the buses running.
    pub fn eject(&mut self) {
        if self.session.take().is_some() {
            self.interface.send(Event::ReplaceSession(None));
        }
    }

    pub fn song(&self) -> Option<&SongInfo> {
        self.session.as_ref().map(MixSession::song)
    }

    /// Names of the channels of the loaded song. Empty while no song is loaded.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.session.iter().flat_map(MixSession::channel_names)
    }

    /// Set a channel parameter, clamped to its range. Returns the applied value.
    pub fn set_channel(
        &mut self,
        name: &str,
        param: ChannelParam,
        value: f32,
    ) -> Result<f32, ChannelAccessError> {
        Ok(self.session_mut()?.set_channel(name, param, value)?)
    }

    pub fn channel_param(&self, name: &str, param: ChannelParam) -> Result<f32, ChannelAccessError> {
        Ok(self.session_ref()?.channel(name)?.get(param))
    }

    pub fn set_channel_mute(&mut self, name: &str, mute: bool) -> Result<(), ChannelAccessError> {
        Ok(self.session_mut()?.set_mute(name, mute)?)
    }
    pub fn channel_mute(&self, name: &str) -> Result<bool, ChannelAccessError> {
        Ok(self.session_ref()?.channel(name)?.mute())
    }

    pub fn set_channel_solo(&mut self, name: &str, solo: bool) -> Result<(), ChannelAccessError> {
        Ok(self.session_mut()?.set_solo(name, solo)?)
    }
    pub fn channel_solo(&self, name: &str) -> Result<bool, ChannelAccessError> {
        Ok(self.session_ref()?.channel(name)?.solo())
    }

    pub fn read_channel_meter(&self, name: &str) -> Result<MeterReading, ChannelAccessError> {
        Ok(self.session_ref()?.channel(name)?.read_meter())
    }

    /// Play from the current playhead position.
    ///
    /// A song whose stems all failed to load counts as no song.
    pub fn play(&mut self) -> Result<(), NoSongLoadedError> {
        let session = self.session_mut()?;
        if session.channel_names().next().is_none() {
            return Err(NoSongLoadedError);
        }
        session.transport.play();
        Ok(())
    }
    /// Pause playback, keeping the playhead position.
    pub fn pause(&mut self) -> Result<(), NoSongLoadedError> {
        self.session_mut()?.transport.pause();
        Ok(())
    }
    /// Pause playback and reset the playhead to the beginning.
    pub fn stop(&mut self) -> Result<(), NoSongLoadedError> {
        self.session_mut()?.transport.pause();
        self.interface.send(Event::JumpTo(0));
        Ok(())
    }
    /// Move the playhead, clamped to the song. Works both while playing and while paused.
    pub fn seek(&mut self, secs: f64) -> Result<(), NoSongLoadedError> {
        let frame = self.session_ref()?.transport.frame_of_secs(secs);
        self.interface.send(Event::JumpTo(frame));
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.transport.is_playing())
    }

    /// The current playhead position in seconds, as it currently is on the audio thread.
    ///
    /// This might have a slight delay in reacting to [`Engine::seek()`].
    pub fn playhead_secs(&self) -> f64 {
        self.session
            .as_ref()
            .map(|session| session.transport.playhead_secs())
            .unwrap_or(0.0)
    }

    /// Duration of the loaded song (its longest stem) in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.session
            .as_ref()
            .map(|session| session.transport.duration_secs())
            .unwrap_or(0.0)
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) -> Result<(), NoSongLoadedError> {
        let state = self.session_mut()?.transport.set_loop_enabled(enabled);
        self.interface.send(Event::SetLoop(state));
        Ok(())
    }
    pub fn loop_enabled(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.transport.loop_state().enabled)
    }

    /// Move the loop start marker. It is pinned below the end marker,
    /// keeping at least [`MIN_LOOP_GAP_SECS`] between them.
    pub fn set_loop_start(&mut self, secs: f64) -> Result<(), NoSongLoadedError> {
        let state = self.session_mut()?.transport.set_loop_start(secs);
        self.interface.send(Event::SetLoop(state));
        Ok(())
    }
    /// Move the loop end marker. It is pinned above the start marker.
    pub fn set_loop_end(&mut self, secs: f64) -> Result<(), NoSongLoadedError> {
        let state = self.session_mut()?.transport.set_loop_end(secs);
        self.interface.send(Event::SetLoop(state));
        Ok(())
    }
    /// Set both loop markers at once.
    pub fn set_loop_region(&mut self, start_secs: f64, end_secs: f64) -> Result<(), NoSongLoadedError> {
        let state = self.session_mut()?.transport.set_loop_region(start_secs, end_secs);
        self.interface.send(Event::SetLoop(state));
        Ok(())
    }
    /// The loop region in seconds, if a song is loaded and a region has been set.
    pub fn loop_region_secs(&self) -> Option<(f64, f64)> {
        self.session
            .as_ref()
            .and_then(|session| session.transport.loop_region_secs())
    }

    pub fn master_gain(&self) -> f32 {
        self.interface.master.gain()
    }
    pub fn set_master_gain(&self, value: f32) {
        self.interface.master.set_gain(value);
    }
    pub fn read_master_meter(&self) -> MeterReading {
        self.interface.master.read_meter()
    }
    /// The master signal folded into [`SPECTRUM_BINS`] frequency bands.
    pub fn read_spectrum(&self) -> [f32; SPECTRUM_BINS] {
        self.interface.master.read_spectrum()
    }
    /// Move the captured master output into `out`, in interleaved stereo.
    pub fn drain_capture(&mut self, out: &mut Vec<Sample>) {
        self.interface.master.drain_capture(out);
    }
    /// Number of buffers that have (partially) been lost because the capture
    /// reader fell behind.
    pub fn capture_overruns(&self) -> usize {
        self.interface.master.capture_overruns()
    }

    pub fn reverb_size(&self) -> f32 {
        self.interface.reverb.size()
    }
    /// Change the reverb size, regenerating its impulse if the (clamped) size changed.
    pub fn set_reverb_size(&mut self, secs: f32) {
        if let Some(kernel) = self.interface.reverb.set_size(secs) {
            self.interface.send(Event::SwapReverbKernel(DBox::new(kernel)));
        }
    }
    pub fn reverb_return(&self) -> f32 {
        self.interface.reverb.return_level()
    }
    pub fn set_reverb_return(&self, value: f32) {
        self.interface.reverb.set_return_level(value);
    }

    pub fn echo_time(&self) -> f32 {
        self.interface.echo.time()
    }
    pub fn set_echo_time(&self, secs: f32) {
        self.interface.echo.set_time(secs);
    }
    pub fn echo_feedback(&self) -> f32 {
        self.interface.echo.feedback()
    }
    pub fn set_echo_feedback(&self, value: f32) {
        self.interface.echo.set_feedback(value);
    }
    pub fn echo_cutoff(&self) -> f32 {
        self.interface.echo.cutoff()
    }
    pub fn set_echo_cutoff(&self, hz: f32) {
        self.interface.echo.set_cutoff(hz);
    }
    pub fn echo_return(&self) -> f32 {
        self.interface.echo.return_level()
    }
    pub fn set_echo_return(&self, value: f32) {
        self.interface.echo.set_return_level(value);
    }

    /// Capture the whole console under `name`, stored for the loaded song.
    /// A snapshot with the same name is replaced.
    pub fn save_snapshot(&mut self, name: &str) -> Result<(), NoSongLoadedError> {
        let session = self.session.as_ref().ok_or(NoSongLoadedError)?;
        let snapshot = MixSnapshot {
            name: name.to_owned(),
            master: self.interface.master.state(),
            reverb: self.interface.reverb.state(),
            echo: self.interface.echo.state(),
            channels: session.snapshot_channels(),
        };
        self.snapshots.add(&session.song().id, snapshot);
        Ok(())
    }

    /// All snapshots stored for the loaded song. Empty while no song is loaded.
    pub fn snapshots(&self) -> &[MixSnapshot] {
        match &self.session {
            Some(session) => self.snapshots.list(&session.song().id),
            None => &[],
        }
    }

    /// Write a stored snapshot back onto the console.
    ///
    /// Snapshot channels with no matching channel in the loaded song are skipped.
    pub fn apply_snapshot(&mut self, name: &str) -> Result<(), ApplySnapshotError> {
        let session = self.session.as_mut().ok_or(ApplySnapshotError::NoSongLoaded)?;
        let snapshot = self
            .snapshots
            .get(&session.song().id, name)
            .ok_or_else(|| ApplySnapshotError::UnknownSnapshot(name.to_owned()))?;

        self.interface.master.set_gain(snapshot.master.gain);
        self.interface.reverb.set_return_level(snapshot.reverb.return_level);
        self.interface.echo.set_time(snapshot.echo.time);
        self.interface.echo.set_feedback(snapshot.echo.feedback);
        self.interface.echo.set_cutoff(snapshot.echo.cutoff);
        self.interface.echo.set_return_level(snapshot.echo.return_level);

        session.apply_channel_states(&snapshot.channels);

        // The impulse is only regenerated if the size actually changed
        if let Some(kernel) = self.interface.reverb.set_size(snapshot.reverb.size) {
            self.interface.send(Event::SwapReverbKernel(DBox::new(kernel)));
        }
        Ok(())
    }

    /// Back the snapshots by the JSON file at `path`, loading whatever it already holds.
    pub fn open_snapshot_store(&mut self, path: &Path) -> Result<(), SnapshotIoError> {
        self.snapshots = SnapshotStore::open(path)?;
        Ok(())
    }

    /// Write the snapshots back to their file. A no-op for in-memory stores.
    pub fn persist_snapshots(&self) -> Result<(), SnapshotIoError> {
        self.snapshots.persist()
    }

    fn session_ref(&self) -> Result<&MixSession, NoSongLoadedError> {
        self.session.as_ref().ok_or(NoSongLoadedError)
    }
    fn session_mut(&mut self) -> Result<&mut MixSession, NoSongLoadedError> {
        self.session.as_mut().ok_or(NoSongLoadedError)
    }
}
impl Drop for Engine {
    /// Closes down the engine gracefully.
    fn drop(&mut self) {
        self.stop_stream();
    }
}

fn max_buffer_size_of(config: &Config) -> usize {
    match config.output_config.buffer_size {
        // If usize is smaller than our buffersize we have bigger problems
        Some(size) => size.try_into().expect("Buffer size overflows usize"),
        None => MAX_BUFFER_SIZE_DEFAULT,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum InvalidConfigError {
    DeviceNotAvailable,
    Other,
}
impl Display for InvalidConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidConfigError::DeviceNotAvailable => write!(
                f,
                "Engine received unsupported configuration: Device is not available"
            ),
            InvalidConfigError::Other => write!(f, "Engine received unsupported configuration"),
        }
    }
}
impl Error for InvalidConfigError {}

/// The operation needs a loaded song.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSongLoadedError;
impl Display for NoSongLoadedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "No song is loaded")
    }
}
impl Error for NoSongLoadedError {}

#[derive(Debug, PartialEq, Eq)]
pub enum ChannelAccessError {
    NoSongLoaded,
    UnknownChannel(UnknownChannelError),
}
impl Display for ChannelAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSongLoaded => Display::fmt(&NoSongLoadedError, f),
            Self::UnknownChannel(e) => Display::fmt(e, f),
        }
    }
}
impl Error for ChannelAccessError {}
impl From<NoSongLoadedError> for ChannelAccessError {
    fn from(NoSongLoadedError: NoSongLoadedError) -> Self {
        Self::NoSongLoaded
    }
}
impl From<UnknownChannelError> for ChannelAccessError {
    fn from(e: UnknownChannelError) -> Self {
        Self::UnknownChannel(e)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ApplySnapshotError {
    NoSongLoaded,
    UnknownSnapshot(String),
}
impl Display for ApplySnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSongLoaded => Display::fmt(&NoSongLoadedError, f),
            Self::UnknownSnapshot(name) => {
                write!(f, "No snapshot named \"{name}\" for the loaded song")
            }
        }
    }
}
impl Error for ApplySnapshotError {}
