use std::{
    borrow::Cow,
    error::Error,
    fmt::{Debug, Display},
    fs::File,
    path::{Path, PathBuf},
};

use rubato::{FftFixedIn, Resampler};
use symphonia::core::{
    audio::{AudioBuffer, AudioBufferRef, Signal},
    codecs::DecoderOptions,
    conv::IntoSample,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    sample::Sample as SymphoniaSample,
};

use crate::engine::{Sample, CHANNELS};

/// A fully decoded stem, stored as interleaved stereo at the engine's sample rate.
///
/// Immutable once imported, so it can be shared with the audio thread via [`std::sync::Arc`].
#[derive(PartialEq)]
pub struct StemBuffer {
    sample_rate: u32,
    /// Interleaved stereo frames.
    frames: Vec<Sample>,
}
impl StemBuffer {
    /// Decode the file at `path` and convert it to interleaved stereo at `sample_rate`.
    ///
    /// Mono files are duplicated onto both channels.
    pub fn import(path: &Path, sample_rate: u32) -> Result<Self, StemImportError> {
        // Currently the entire stem just gets loaded into memory immediately.
        // I guess that could be improved.

        let file = Box::new(
            File::open(path).map_err(|_| StemImportError::FileNotFound(path.to_path_buf()))?,
        );
        let mss = MediaSourceStream::new(file, Default::default());

        let mut hint = Hint::new();
        if let Some(os_extension) = path.extension() {
            if let Some(extension) = os_extension.to_str() {
                hint.with_extension(extension);
            }
        }

        let format_options = FormatOptions::default();
        let metadata_options = MetadataOptions::default();
        let decoder_options = DecoderOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_options, &metadata_options)
            .or(Err(StemImportError::UnknownFormat))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| StemImportError::Other("No default track".to_owned()))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &decoder_options)
            .or(Err(StemImportError::UnknownFormat))?;

        let mut source_sample_rate = 0;
        let mut audio_data: Vec<Vec<Sample>> = Vec::with_capacity(CHANNELS);
        let mut first = true;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(_)) => break,
                Err(e) => return Err(StemImportError::Other(format!("{e}"))),
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(received_buffer) => {
                    if first {
                        first = false;

                        let channels = received_buffer.spec().channels.count();
                        source_sample_rate = received_buffer.spec().rate;

                        if channels > CHANNELS {
                            return Err(StemImportError::TooManyChannels);
                        }

                        for _ in 0..channels {
                            audio_data.push(Vec::new());
                        }
                    }

                    Self::extend_from_buffer(&mut audio_data, received_buffer);
                }
                // A corrupt packet doesn't have to ruin the whole stem
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(StemImportError::Other(format!("{e}"))),
            }
        }

        if audio_data.is_empty() || audio_data[0].is_empty() {
            return Err(StemImportError::Other("File contains no audio".to_owned()));
        }

        let audio_data = Self::resample(audio_data, source_sample_rate, sample_rate)?;

        // Interleave to stereo
        let length = audio_data[0].len();
        let mut frames = Vec::with_capacity(length * CHANNELS);
        match audio_data.len() {
            1 => {
                for &sample in &audio_data[0] {
                    frames.push(sample);
                    frames.push(sample);
                }
            }
            _ => {
                for (&left, &right) in audio_data[0].iter().zip(&audio_data[1]) {
                    frames.push(left);
                    frames.push(right);
                }
            }
        }

        Ok(Self {
            sample_rate,
            frames,
        })
    }

    fn extend_from_buffer(data: &mut [Vec<Sample>], buffer_ref: AudioBufferRef) {
        use AudioBufferRef as A;
        match buffer_ref {
            A::U8(buffer) => extend(data, buffer),
            A::S8(buffer) => extend(data, buffer),
            A::U16(buffer) => extend(data, buffer),
            A::U24(buffer) => extend(data, buffer),
            A::U32(buffer) => extend(data, buffer),
            A::S16(buffer) => extend(data, buffer),
            A::S24(buffer) => extend(data, buffer),
            A::S32(buffer) => extend(data, buffer),
            A::F32(buffer) => extend(data, buffer),
            A::F64(buffer) => extend(data, buffer),
        };

        fn extend<S>(data: &mut [Vec<Sample>], buffer: Cow<AudioBuffer<S>>)
        where
            S: SymphoniaSample + IntoSample<Sample>,
        {
            for (chan_i, output) in data.iter_mut().enumerate() {
                let received = buffer.chan(chan_i);
                for &sample in received {
                    output.push(sample.into_sample());
                }
            }
        }
    }

    fn resample(
        audio_data: Vec<Vec<Sample>>,
        from_rate: u32,
        to_rate: u32,
    ) -> Result<Vec<Vec<Sample>>, StemImportError> {
        if from_rate == to_rate {
            return Ok(audio_data);
        }

        let channels = audio_data.len();
        let mut resampler =
            FftFixedIn::<Sample>::new(from_rate as usize, to_rate as usize, 1024, 2, channels)
                .map_err(|e| StemImportError::Other(format!("{e}")))?;

        let length = audio_data[0].len();
        let mut output: Vec<Vec<Sample>> = vec![Vec::new(); channels];
        let mut position = 0;
        while position < length {
            let needed = resampler.input_frames_next();
            let end = (position + needed).min(length);
            let chunk: Vec<&[Sample]> = audio_data
                .iter()
                .map(|channel| &channel[position..end])
                .collect();

            let resampled = if end - position == needed {
                resampler.process(&chunk, None)
            } else {
                // The tail is padded with silence internally
                resampler.process_partial(Some(&chunk), None)
            }
            .map_err(|e| StemImportError::Other(format!("{e}")))?;

            for (channel_output, resampled_channel) in output.iter_mut().zip(resampled) {
                channel_output.extend_from_slice(&resampled_channel);
            }
            position = end;
        }

        Ok(output)
    }

    /// Build a stem directly from interleaved frames.
    #[cfg(test)]
    pub(crate) fn from_frames(frames: Vec<Sample>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel) in total
    pub fn len_frames(&self) -> usize {
        self.frames.len() / CHANNELS
    }

    pub fn duration_secs(&self) -> f64 {
        self.len_frames() as f64 / f64::from(self.sample_rate)
    }

    /// Copy frames starting at `start_frame` into `out`.
    ///
    /// Everything past the end of the stem is filled with silence.
    pub fn fill_from(&self, start_frame: usize, out: &mut [Sample]) {
        let start = start_frame.min(self.len_frames()) * CHANNELS;
        let available = self.frames.len() - start;
        let copied = available.min(out.len());

        out[..copied].copy_from_slice(&self.frames[start..start + copied]);
        out[copied..].fill(0.0);
    }
}
impl Debug for StemBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StemBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("len_frames", &self.len_frames())
            .finish()
    }
}

#[derive(Debug)]
pub enum StemImportError {
    FileNotFound(PathBuf),
    UnknownFormat,
    /// Only mono and stereo stems are supported
    TooManyChannels,
    Other(String),
}
impl Display for StemImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileNotFound(path) => write!(f, "File could not be found: {path:?}"),
            Self::UnknownFormat => write!(f, "File format not supported"),
            Self::TooManyChannels => {
                write!(f, "Only files with 1 or 2 channels are supported")
            }
            Self::Other(msg) => write!(f, "Error during import: {msg}"),
        }
    }
}
impl Error for StemImportError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem_with_frames(frames: Vec<Sample>) -> StemBuffer {
        StemBuffer {
            sample_rate: 48_000,
            frames,
        }
    }

    #[test]
    fn fill_from_within_bounds() {
        let stem = stem_with_frames(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut out = [0.0; 4];

        stem.fill_from(1, &mut out);

        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn fill_from_pads_with_silence() {
        let stem = stem_with_frames(vec![1.0, 2.0, 3.0, 4.0]);
        let mut out = [9.0; 6];

        stem.fill_from(1, &mut out);

        assert_eq!(out, [3.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn fill_from_past_end_is_silent() {
        let stem = stem_with_frames(vec![1.0, 2.0]);
        let mut out = [9.0; 4];

        stem.fill_from(100, &mut out);

        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn duration_matches_length() {
        let stem = StemBuffer {
            sample_rate: 48_000,
            frames: vec![0.0; 48_000 * CHANNELS],
        };

        assert_eq!(stem.duration_secs(), 1.0);
    }
}
