#![allow(dead_code)]

use std::path::PathBuf;

use stemmix::{SongDescriptor, StemSource};

pub const SAMPLE_RATE: u32 = 48_000;

/// Write a mono 32-bit float wav file to the temp directory.
///
/// File names must be unique per test, since tests run in parallel.
pub fn wav_stem(file_name: &str, samples: &[f32]) -> PathBuf {
    let path = std::env::temp_dir().join(file_name);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    path
}

pub fn constant_samples(value: f32, secs: f64) -> Vec<f32> {
    vec![value; (secs * SAMPLE_RATE as f64) as usize]
}

pub fn song(id: &str, stems: Vec<(&str, PathBuf)>) -> SongDescriptor {
    SongDescriptor {
        id: id.to_owned(),
        title: id.to_owned(),
        stems: stems
            .into_iter()
            .map(|(name, path)| StemSource {
                name: name.to_owned(),
                path,
            })
            .collect(),
    }
}
