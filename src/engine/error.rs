pub use super::{
    config::{DeviceUnavailableError, HostUnavailableError},
    ApplySnapshotError, ChannelAccessError, InvalidConfigError, NoSongLoadedError,
    SnapshotIoError, StemImportError, StemLoadError, UnknownChannelError,
};
