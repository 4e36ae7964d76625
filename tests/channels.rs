mod utils;

use stemmix::{ChannelAccessError, ChannelParam, Engine, Processor};
use utils::{constant_samples, song, wav_stem};

const BUFFER_SIZE: usize = 1024;

/// Render a number of buffers and return the peak of the last one.
fn settled_peak(processor: &mut Processor, buffers: usize) -> f32 {
    let mut peak = 0.0_f32;
    for _ in 0..buffers {
        processor.poll();
        let out = processor.output_samples(BUFFER_SIZE);
        peak = out.iter().fold(0.0, |max, &sample| max.max(sample.abs()));
    }
    peak
}

#[test]
fn loaded_stems_become_channels() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let song = song(
        "names",
        vec![
            ("drums", wav_stem("names_drums.wav", &constant_samples(0.1, 0.1))),
            ("bass", wav_stem("names_bass.wav", &constant_samples(0.1, 0.1))),
        ],
    );
    let errors = engine.load_song(&song);
    assert!(errors.is_empty());

    let mut names: Vec<&str> = engine.channel_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["bass", "drums"]);
}

#[test]
fn unreadable_stems_are_skipped_with_an_error() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let song = song(
        "partial",
        vec![
            ("good", wav_stem("partial_good.wav", &constant_samples(0.1, 0.1))),
            ("bad", "/definitely/not/here.wav".into()),
        ],
    );
    let errors = engine.load_song(&song);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stem, "bad");
    let names: Vec<&str> = engine.channel_names().collect();
    assert_eq!(names, vec!["good"]);
}

#[test]
fn unknown_channel_is_an_error() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let song = song(
        "unknown",
        vec![("only", wav_stem("unknown_only.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&song);

    let result = engine.set_channel("vocals", ChannelParam::Fader, 1.0);
    assert!(matches!(
        result,
        Err(ChannelAccessError::UnknownChannel(_))
    ));
}

#[test]
fn parameters_are_clamped() {
    let (mut engine, _processor) = Engine::dummy_with_processor();

    let song = song(
        "clamped",
        vec![("only", wav_stem("clamped_only.wav", &constant_samples(0.1, 0.1)))],
    );
    engine.load_song(&song);

    let applied = engine.set_channel("only", ChannelParam::Fader, 100.0).unwrap();
    assert_eq!(applied, 3.0);
    assert_eq!(engine.channel_param("only", ChannelParam::Fader).unwrap(), 3.0);

    let applied = engine.set_channel("only", ChannelParam::Pan, -5.0).unwrap();
    assert_eq!(applied, -1.0);
}

#[test]
fn mute_silences_a_channel() {
    let (mut engine, mut processor) = Engine::dummy_with_processor();

    let song = song(
        "muting",
        vec![("only", wav_stem("muting_only.wav", &constant_samples(0.2, 4.0)))],
    );
    engine.load_song(&song);
    engine.play().unwrap();

    assert!(settled_peak(&mut processor, 8) > 0.05);

    engine.set_channel_mute("only", true).unwrap();
    assert!(settled_peak(&mut processor, 8) < 1e-4);

    engine.set_channel_mute("only", false).unwrap();
    assert!(settled_peak(&mut processor, 8) > 0.05);
}

#[test]
fn solo_silences_the_others_and_overrides_mute() {
    let (mut engine, mut processor) = Engine::dummy_with_processor();

    let song = song(
        "soloing",
        vec![
            ("a", wav_stem("soloing_a.wav", &constant_samples(0.2, 4.0))),
            ("b", wav_stem("soloing_b.wav", &constant_samples(0.2, 4.0))),
        ],
    );
    engine.load_song(&song);
    engine.play().unwrap();

    let both = settled_peak(&mut processor, 8);
    assert!(both > 0.05);

    // A muted channel comes back as soon as it is soloed
    engine.set_channel_mute("a", true).unwrap();
    engine.set_channel_solo("a", true).unwrap();
    let only_a = settled_peak(&mut processor, 8);
    assert!(only_a > 0.05);
    assert!(only_a < both);

    engine.set_channel_solo("a", false).unwrap();
    // Now the mute takes effect again and only "b" plays
    let only_b = settled_peak(&mut processor, 8);
    assert!(only_b > 0.05);
    assert!(only_b < both);
}

#[test]
fn channel_meter_follows_the_signal() {
    let (mut engine, mut processor) = Engine::dummy_with_processor();

    let song = song(
        "metering",
        vec![("only", wav_stem("metering_only.wav", &constant_samples(0.2, 4.0)))],
    );
    engine.load_song(&song);
    engine.play().unwrap();

    settled_peak(&mut processor, 8);
    let reading = engine.read_channel_meter("only").unwrap();
    assert!(reading.peak[0] > 0.05);
    assert!(reading.rms[0] > 0.05);
    assert!(!reading.clipped);
}

#[test]
fn sends_feed_the_reverb_even_with_the_fader_down() {
    let (mut engine, mut processor) = Engine::dummy_with_processor();

    let song = song(
        "sending",
        vec![("only", wav_stem("sending_only.wav", &constant_samples(0.2, 4.0)))],
    );
    engine.load_song(&song);

    engine.set_channel("only", ChannelParam::Fader, 0.0).unwrap();
    engine.set_channel("only", ChannelParam::SendA, 1.0).unwrap();
    engine.set_reverb_return(1.0);
    engine.play().unwrap();

    // Plenty of buffers for the convolver latency and parameter ramps
    let wet = settled_peak(&mut processor, 16);
    assert!(wet > 1e-3);

    // Cutting the return silences it again
    engine.set_reverb_return(0.0);
    engine.set_channel("only", ChannelParam::SendA, 0.0).unwrap();
    let dry = settled_peak(&mut processor, 300);
    assert!(dry < 1e-3);
}
