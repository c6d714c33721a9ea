//! Writes a synthesized vibration waveform out as a mono 32-bit float WAV
//! file, so a stimulus can be inspected or played back without the rig.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// The WAV layout for a waveform at `sample_rate`.
pub fn vibration_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Writes `waveform` to `path`. Samples are narrowed to `f32`.
pub fn write_vibration(
    path: impl AsRef<Path>,
    waveform: &[f64],
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, vibration_spec(sample_rate))?;
    for &sample in waveform {
        writer.write_sample(sample as f32)?;
    }

    // finalize explicitly so header errors are not lost on drop
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use std::f64::consts::PI;

    #[test]
    fn waveform_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stimulus.wav");
        let waveform: Vec<f64> = (0..500)
            .map(|i| (2.0 * PI * 50.0 * i as f64 / 10000.0).sin())
            .collect();

        write_vibration(&path, &waveform, 10000).unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec(), vibration_spec(10000));
        let samples = reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, hound::Error>>()
            .unwrap();
        assert_eq!(samples.len(), 500);
        for (got, want) in samples.iter().zip(&waveform) {
            assert_eq!(*got, *want as f32);
        }
    }
}
