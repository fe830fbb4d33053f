//! Runs the `quietvox-denoise` binary on generated WAV fixtures.

use std::path::PathBuf;
use std::process::Command;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

fn fixture_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("quietvox-{}-{}", std::process::id(), name))
}

fn write_fixture(path: &PathBuf, spec: WavSpec, frames: usize) {
    let mut writer = WavWriter::create(path, spec).unwrap();
    let mut state = 0x1234_5678u32;
    for i in 0..frames {
        let tone = (2.0 * std::f32::consts::PI * 220.0 * i as f32 / spec.sample_rate as f32).sin();
        for _ in 0..spec.channels {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let hiss = (state as f32 / u32::MAX as f32 - 0.5) * 0.1;
            let v = 0.3 * tone + hiss;
            match spec.sample_format {
                SampleFormat::Int => writer.write_sample((v * 32767.0) as i16).unwrap(),
                SampleFormat::Float => writer.write_sample(v).unwrap(),
            }
        }
    }
    writer.finalize().unwrap();
}

fn run_tool(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_quietvox-denoise"))
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_denoises_16_bit_stereo_file() {
    let input = fixture_path("in16.wav");
    let output = fixture_path("out16.wav");
    let spec = WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    write_fixture(&input, spec, 24_000);

    let result = run_tool(&[
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--level",
        "high",
        "--block",
        "300",
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("frames processed"));
    assert!(stdout.contains("High"));

    let reader = WavReader::open(&output).unwrap();
    assert_eq!(reader.spec(), spec);
    assert_eq!(reader.duration(), 24_000);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 48_000);
    assert!(samples.iter().any(|&s| s != 0));

    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn test_resamples_float_mono_file() {
    let input = fixture_path("in_f32.wav");
    let output = fixture_path("out_f32.wav");
    let spec = WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    write_fixture(&input, spec, 10_000);

    let result = run_tool(&[input.to_str().unwrap(), output.to_str().unwrap()]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let reader = WavReader::open(&output).unwrap();
    assert_eq!(reader.spec(), spec);
    let samples: Vec<f32> = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 10_000);
    assert!(samples.iter().all(|v| v.is_finite()));

    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn test_rejects_bad_arguments() {
    assert!(!run_tool(&[]).status.success());
    assert!(!run_tool(&["a.wav", "b.wav", "--level", "extreme"]).status.success());
    assert!(!run_tool(&["a.wav", "b.wav", "--block", "0"]).status.success());

    let missing = fixture_path("does-not-exist.wav");
    let out = fixture_path("never-written.wav");
    let result = run_tool(&[missing.to_str().unwrap(), out.to_str().unwrap()]);
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("failed to open input WAV"));
}
