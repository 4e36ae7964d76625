mod utils;

use stemmix::{ApplySnapshotError, ChannelParam, Engine};
use utils::{constant_samples, song, wav_stem};

#[test]
fn snapshot_restores_the_whole_console() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let song = song(
        "restore",
        vec![("drums", wav_stem("restore_drums.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&song);

    engine.set_channel("drums", ChannelParam::Fader, 2.0).unwrap();
    engine.set_channel("drums", ChannelParam::LowGain, 6.0).unwrap();
    engine.set_channel_mute("drums", true).unwrap();
    engine.set_master_gain(1.5);
    engine.set_echo_time(0.5);
    engine.set_reverb_return(0.8);
    engine.save_snapshot("verse").unwrap();

    // Scramble everything
    engine.set_channel("drums", ChannelParam::Fader, 0.1).unwrap();
    engine.set_channel("drums", ChannelParam::LowGain, -15.0).unwrap();
    engine.set_channel_mute("drums", false).unwrap();
    engine.set_master_gain(0.2);
    engine.set_echo_time(0.1);
    engine.set_reverb_return(0.1);

    engine.apply_snapshot("verse").unwrap();

    assert_eq!(engine.channel_param("drums", ChannelParam::Fader).unwrap(), 2.0);
    assert_eq!(engine.channel_param("drums", ChannelParam::LowGain).unwrap(), 6.0);
    assert!(engine.channel_mute("drums").unwrap());
    assert_eq!(engine.master_gain(), 1.5);
    assert_eq!(engine.echo_time(), 0.5);
    assert_eq!(engine.reverb_return(), 0.8);
}

#[test]
fn snapshots_are_stored_per_song() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let first = song(
        "per-song-first",
        vec![("only", wav_stem("per_song_first.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&first);
    engine.save_snapshot("verse").unwrap();
    assert_eq!(engine.snapshots().len(), 1);

    let second = song(
        "per-song-second",
        vec![("only", wav_stem("per_song_second.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&second);
    assert!(engine.snapshots().is_empty());
    assert_eq!(
        engine.apply_snapshot("verse"),
        Err(ApplySnapshotError::UnknownSnapshot("verse".to_owned()))
    );

    // The first song's snapshot is still there when it comes back
    engine.load_song(&first);
    assert_eq!(engine.snapshots().len(), 1);
    engine.apply_snapshot("verse").unwrap();
}

#[test]
fn same_name_replaces_the_snapshot() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let song = song(
        "replace",
        vec![("only", wav_stem("replace_only.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&song);

    engine.set_master_gain(0.5);
    engine.save_snapshot("verse").unwrap();
    engine.set_master_gain(2.0);
    engine.save_snapshot("verse").unwrap();

    assert_eq!(engine.snapshots().len(), 1);
    engine.set_master_gain(1.0);
    engine.apply_snapshot("verse").unwrap();
    assert_eq!(engine.master_gain(), 2.0);
}

#[test]
fn snapshot_channels_missing_from_the_song_are_skipped() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let full = song(
        "skipped",
        vec![
            ("drums", wav_stem("skipped_drums.wav", &constant_samples(0.1, 0.1))),
            ("bass", wav_stem("skipped_bass.wav", &constant_samples(0.1, 0.1))),
        ],
    );
    engine.load_song(&full);
    engine.set_channel("bass", ChannelParam::Fader, 2.0).unwrap();
    engine.save_snapshot("verse").unwrap();

    // Same song id, but the bass stem is gone now
    let reduced = song(
        "skipped",
        vec![("drums", wav_stem("skipped_drums.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&reduced);

    engine.apply_snapshot("verse").unwrap();
    assert!(engine.channel_param("bass", ChannelParam::Fader).is_err());
}

#[test]
fn snapshots_survive_a_restart_through_the_store_file() {
    let path = std::env::temp_dir().join("snapshots_survive_restart.json");
    let _ = std::fs::remove_file(&path);

    let song = song(
        "persisted",
        vec![("only", wav_stem("persisted_only.wav", &constant_samples(0.1, 0.1)))],
    );

    {
        let (mut engine, _processor) = Engine::dummy_with_processor();
        engine.open_snapshot_store(&path).unwrap();
        engine.load_song(&song);
        engine.set_master_gain(1.25);
        engine.save_snapshot("verse").unwrap();
        engine.persist_snapshots().unwrap();
    }

    let (mut engine, _processor) = Engine::dummy_with_processor();
    engine.open_snapshot_store(&path).unwrap();
    engine.load_song(&song);

    engine.apply_snapshot("verse").unwrap();
    assert_eq!(engine.master_gain(), 1.25);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn saving_needs_a_song() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    assert!(engine.save_snapshot("verse").is_err());
    assert_eq!(
        engine.apply_snapshot("verse"),
        Err(ApplySnapshotError::NoSongLoaded)
    );
    assert!(engine.snapshots().is_empty());
}
