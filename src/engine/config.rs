use std::error::Error;
use std::fmt::Display;
use std::ops::RangeInclusive;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::engine::CHANNELS;

const PREFERRED_SAMPLE_RATE: u32 = 48_000;
const PREFERRED_BUFFER_SIZE: u32 = 512;

/// Which device the engine plays through, and how.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_device: OutputDevice,
    pub output_config: OutputConfig,
}
impl Config {
    /// A config for engines that never open a real stream.
    pub(crate) fn dummy() -> Self {
        Self {
            output_device: OutputDevice {
                host: Host {
                    name: "Dummy".to_owned(),
                },
                name: "Dummy".to_owned(),
            },
            output_config: OutputConfig {
                channels: CHANNELS as u16,
                sample_format: SampleFormat::F32,
                sample_rate: 48_000,
                buffer_size: Some(1024),
            },
        }
    }
}
impl Default for Config {
    fn default() -> Self {
        let host = Host::default();
        let output_device = host
            .default_output_device()
            .expect("Default host is unavailable")
            .expect("No output device available");
        let output_config = output_device
            .default_config_range()
            .expect("No supported output config available for the default output device")
            .default_config();

        Self {
            output_device,
            output_config,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,

    /// Buffer size in frames.
    /// If `None`, the default buffer size is used.
    pub buffer_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Host {
    name: String,
}
impl Host {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_output_device(&self) -> Result<Option<OutputDevice>, HostUnavailableError> {
        let device = self.raw()?.default_output_device();
        Ok(device.map(|device| OutputDevice {
            host: self.clone(),
            name: device.name().unwrap_or_default(),
        }))
    }

    pub(crate) fn raw(&self) -> Result<cpal::Host, HostUnavailableError> {
        let id = cpal::available_hosts()
            .into_iter()
            .find(|host| host.name() == self.name)
            .ok_or_else(|| HostUnavailableError {
                name: self.name.clone(),
            })?;

        cpal::host_from_id(id).map_err(|cpal::HostUnavailable| HostUnavailableError {
            name: self.name.clone(),
        })
    }
}
impl Default for Host {
    fn default() -> Self {
        Self {
            name: cpal::default_host().id().name().into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputDevice {
    host: Host,
    name: String,
}
impl OutputDevice {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_config_range(&self) -> Result<OutputConfigRange, DeviceUnavailableError> {
        let config = self
            .raw()?
            .default_output_config()
            .map_err(|_| DeviceUnavailableError::DeviceUnavailable(self.name.clone()))?;

        let buffer_size = match *config.buffer_size() {
            cpal::SupportedBufferSize::Unknown => None,

            // This seems to be a bug in cpal (see https://github.com/RustAudio/cpal/issues/795)
            cpal::SupportedBufferSize::Range {
                min: u32::MIN,
                max: u32::MAX,
            } => None,

            cpal::SupportedBufferSize::Range { min, max } => Some(min..=max),
        };

        Ok(OutputConfigRange {
            channels: config.channels(),
            sample_format: config.sample_format().into(),
            sample_rate: config.sample_rate().0..=config.sample_rate().0,
            buffer_size,
        })
    }

    pub(crate) fn raw(&self) -> Result<cpal::Device, DeviceUnavailableError> {
        let host = self
            .host
            .raw()
            .map_err(|e| DeviceUnavailableError::HostUnavailable(e.name))?;

        let mut devices = host
            .output_devices()
            .map_err(|_| DeviceUnavailableError::DeviceUnavailable(self.name.clone()))?;
        devices
            .find(|device| device.name().map(|name| name == self.name).unwrap_or(false))
            .ok_or_else(|| DeviceUnavailableError::DeviceUnavailable(self.name.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfigRange {
    channels: u16,
    sample_format: SampleFormat,
    sample_rate: RangeInclusive<u32>,
    buffer_size: Option<RangeInclusive<u32>>,
}
impl OutputConfigRange {
    pub fn channels(&self) -> u16 {
        self.channels
    }
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }
    pub fn sample_rate(&self) -> &RangeInclusive<u32> {
        &self.sample_rate
    }
    pub fn buffer_size(&self) -> Option<&RangeInclusive<u32>> {
        self.buffer_size.as_ref()
    }

    pub fn default_config(&self) -> OutputConfig {
        let sample_rate =
            PREFERRED_SAMPLE_RATE.clamp(*self.sample_rate.start(), *self.sample_rate.end());

        let buffer_size = self
            .buffer_size
            .as_ref()
            .map(|range| PREFERRED_BUFFER_SIZE.clamp(*range.start(), *range.end()));

        OutputConfig {
            channels: self.channels,
            sample_format: self.sample_format,
            sample_rate,
            buffer_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}
impl Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::I8 => "8-bit",
            Self::I16 => "16-bit",
            Self::I32 => "32-bit",
            Self::I64 => "64-bit",
            Self::U8 => "8-bit unsigned",
            Self::U16 => "16-bit unsigned",
            Self::U32 => "32-bit unsigned",
            Self::U64 => "64-bit unsigned",
            Self::F32 => "32-bit floating point",
            Self::F64 => "64-bit floating point",
        };
        write!(f, "{name}")
    }
}
impl From<cpal::SampleFormat> for SampleFormat {
    fn from(sample_format: cpal::SampleFormat) -> Self {
        match sample_format {
            cpal::SampleFormat::I8 => Self::I8,
            cpal::SampleFormat::I16 => Self::I16,
            cpal::SampleFormat::I32 => Self::I32,
            cpal::SampleFormat::I64 => Self::I64,
            cpal::SampleFormat::U8 => Self::U8,
            cpal::SampleFormat::U16 => Self::U16,
            cpal::SampleFormat::U32 => Self::U32,
            cpal::SampleFormat::U64 => Self::U64,
            cpal::SampleFormat::F32 => Self::F32,
            cpal::SampleFormat::F64 => Self::F64,
            other => panic!("Unsupported sample format: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostUnavailableError {
    name: String,
}
impl Display for HostUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Host '{}' is not available", self.name)
    }
}
impl Error for HostUnavailableError {}

#[derive(Debug, Clone)]
pub enum DeviceUnavailableError {
    HostUnavailable(String),
    DeviceUnavailable(String),
}
impl Display for DeviceUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostUnavailable(name) => write!(f, "Host '{name}' is not available"),
            Self::DeviceUnavailable(name) => write!(f, "Device '{name}' is not available"),
        }
    }
}
impl Error for DeviceUnavailableError {}
