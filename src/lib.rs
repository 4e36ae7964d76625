mod engine;

pub use engine::{
    config, error, ApplySnapshotError, ChannelAccessError, ChannelParam, ChannelState, Engine,
    EchoBusState, InvalidConfigError, MasterState, MeterReading, MixSnapshot, NoSongLoadedError,
    Processor, ReverbBusState, SnapshotStore, SongDescriptor, SongInfo, StemImportError,
    StemLoadError, StemSource, UnknownChannelError, CUTOFF_RANGE_HZ, FEEDBACK_MAX, GAIN_RANGE,
    MIN_LOOP_GAP_SECS, SIZE_RANGE_SECS, SPECTRUM_BINS, TIME_RANGE_SECS,
};
