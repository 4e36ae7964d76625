use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::components::channel::{
    channel_strip, ChannelParam, ChannelState, ChannelStrip, ChannelStripProcessor,
};
use crate::engine::components::stem::{StemBuffer, StemImportError};
use crate::engine::components::transport::{
    transport, LoopState, PlaySegment, Transport, TransportProcessor,
};
use crate::engine::components::MixPoint;
use crate::engine::info::Info;
use crate::engine::Sample;

/// Identifies a song without carrying its audio.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SongInfo {
    pub id: String,
    pub title: String,
}

/// One stem of a song, pointing at an audio file on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StemSource {
    /// Name the channel strip will be addressed by, e.g. "drums".
    pub name: String,
    pub path: PathBuf,
}

/// A song as it is stored: an identity plus its stem files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SongDescriptor {
    pub id: String,
    pub title: String,
    pub stems: Vec<StemSource>,
}

/// Creates a corresponding pair of [`MixSession`] and [`SessionProcessor`],
/// loading every stem of `song` from disk.
///
/// Stems that fail to import are reported and skipped; the session plays
/// with the stems that did load. Its length is that of the longest stem.
pub fn mix_session(
    song: &SongDescriptor,
    sample_rate: u32,
    max_buffer_size: usize,
) -> (MixSession, SessionProcessor, Vec<StemLoadError>) {
    let mut errors = Vec::new();
    let mut channels = HashMap::new();
    let mut channel_processors = Vec::new();
    let mut length = 0;

    for source in &song.stems {
        let stem = match StemBuffer::import(&source.path, sample_rate) {
            Ok(stem) => Arc::new(stem),
            Err(error) => {
                errors.push(StemLoadError {
                    stem: source.name.clone(),
                    error,
                });
                continue;
            }
        };

        length = length.max(stem.len_frames());
        let (strip, strip_processor) =
            channel_strip(stem, &ChannelState::default(), sample_rate, max_buffer_size);
        channels.insert(source.name.clone(), strip);
        channel_processors.push(strip_processor);
    }

    let (transport, transport_processor) = transport(length, sample_rate, max_buffer_size);

    (
        MixSession {
            song: SongInfo {
                id: song.id.clone(),
                title: song.title.clone(),
            },
            channels,
            transport,
        },
        SessionProcessor {
            channels: channel_processors,
            transport: transport_processor,
        },
        errors,
    )
}

/// The solo/mute policy: what level a fader effectively plays at.
///
/// As soon as any channel is soloed, only soloed channels are audible;
/// otherwise everything except muted channels is.
pub fn effective_level(any_solo: bool, solo: bool, mute: bool, fader: f32) -> f32 {
    if any_solo {
        if solo {
            fader
        } else {
            0.0
        }
    } else if mute {
        0.0
    } else {
        fader
    }
}

/// The controller half of one loaded song: its channel strips and transport.
///
/// Acquired via the [`mix_session`] function.
pub struct MixSession {
    song: SongInfo,
    channels: HashMap<String, ChannelStrip>,
    pub(crate) transport: Transport,
}
impl MixSession {
    pub fn song(&self) -> &SongInfo {
        &self.song
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelStrip, UnknownChannelError> {
        self.channels.get(name).ok_or_else(|| UnknownChannelError {
            channel: name.to_owned(),
        })
    }

    /// Set a channel parameter, clamped to its range. Returns the applied value.
    pub fn set_channel(
        &mut self,
        name: &str,
        param: ChannelParam,
        value: f32,
    ) -> Result<f32, UnknownChannelError> {
        let strip = self.channels.get_mut(name).ok_or_else(|| UnknownChannelError {
            channel: name.to_owned(),
        })?;
        let applied = strip.set(param, value);

        // The fader only becomes audible through the policy pass
        if param == ChannelParam::Fader {
            self.refresh_levels();
        }
        Ok(applied)
    }

    pub fn set_mute(&mut self, name: &str, mute: bool) -> Result<(), UnknownChannelError> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| UnknownChannelError {
                channel: name.to_owned(),
            })?
            .set_mute(mute);
        self.refresh_levels();
        Ok(())
    }

    pub fn set_solo(&mut self, name: &str, solo: bool) -> Result<(), UnknownChannelError> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| UnknownChannelError {
                channel: name.to_owned(),
            })?
            .set_solo(solo);
        self.refresh_levels();
        Ok(())
    }

    /// Reapply the solo/mute policy across all channels.
    ///
    /// A single toggle can change the effective level of every channel,
    /// so this always runs one full pass.
    pub(crate) fn refresh_levels(&mut self) {
        let any_solo = self.channels.values().any(ChannelStrip::solo);
        for strip in self.channels.values() {
            let level = effective_level(any_solo, strip.solo(), strip.mute(), strip.fader());
            strip.apply_output_level(level);
        }
    }

    /// The current state of every channel, keyed by name.
    pub(crate) fn snapshot_channels(&self) -> BTreeMap<String, ChannelState> {
        self.channels
            .iter()
            .map(|(name, strip)| (name.clone(), strip.state()))
            .collect()
    }

    /// Write channel states back by name. Names with no matching channel are skipped.
    pub(crate) fn apply_channel_states(&mut self, states: &BTreeMap<String, ChannelState>) {
        for (name, state) in states {
            if let Some(strip) = self.channels.get_mut(name) {
                strip.apply_state(state);
            }
        }
        self.refresh_levels();
    }
}

/// The audio-thread half of one loaded song.
///
/// Acquired via the [`mix_session`] function.
pub struct SessionProcessor {
    channels: Vec<ChannelStripProcessor>,
    transport: TransportProcessor,
}
impl SessionProcessor {
    pub fn jump_to(&mut self, frame: usize) {
        self.transport.jump_to(frame);
    }

    pub fn set_loop_state(&mut self, loop_state: LoopState) {
        self.transport.set_loop_state(loop_state);
    }

    /// Advance the transport by one buffer and render every channel into `mix`,
    /// accumulating the send taps into the two bus buffers.
    pub fn process(
        &mut self,
        info: &Info,
        send_a_bus: &mut [Sample],
        send_b_bus: &mut [Sample],
        mix: &mut MixPoint,
    ) {
        let segments: &[PlaySegment] = self.transport.advance(info.buffer_size);
        for channel in &mut self.channels {
            mix.add(channel.process(info, segments, send_a_bus, send_b_bus));
        }
    }
}

#[derive(Debug)]
pub struct StemLoadError {
    pub stem: String,
    pub error: StemImportError,
}
impl Display for StemLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to load stem \"{}\": {}", self.stem, self.error)
    }
}
impl Error for StemLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownChannelError {
    pub channel: String,
}
impl Display for UnknownChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "No channel named \"{}\" in the loaded song", self.channel)
    }
}
impl Error for UnknownChannelError {}
