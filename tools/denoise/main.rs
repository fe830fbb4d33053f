//! Offline noise reduction for WAV files.
//!
//! Streams the input through `NoiseReductionPipeline` in host-sized blocks,
//! exactly as a live capture callback would, then removes the pipeline delay
//! so the output lines up with the input.
//!
//! Usage: quietvox-denoise <in.wav> <out.wav> [--level low|medium|high] [--block N] [--settings file.json]

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::info;
use std::path::PathBuf;

use quietvox::{NoiseReductionPipeline, PipelineSettings, ReductionLevel, SampleBuffer};

const DEFAULT_BLOCK: usize = 512;

struct Args {
    input: PathBuf,
    output: PathBuf,
    level: Option<ReductionLevel>,
    block: usize,
    settings: Option<PathBuf>,
}

fn usage() -> &'static str {
    "usage: quietvox-denoise <in.wav> <out.wav> [--level low|medium|high] [--block N] [--settings file.json]"
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut level = None;
    let mut block = DEFAULT_BLOCK;
    let mut settings = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--level" => {
                let name = args.next().context("--level needs a value")?;
                level = Some(
                    ReductionLevel::from_name(&name)
                        .with_context(|| format!("unknown reduction level '{}'", name))?,
                );
            }
            "--block" => {
                let value = args.next().context("--block needs a value")?;
                block = value
                    .parse()
                    .with_context(|| format!("invalid block size '{}'", value))?;
                if block == 0 {
                    bail!("block size must be at least 1");
                }
            }
            "--settings" => {
                settings = Some(PathBuf::from(args.next().context("--settings needs a path")?));
            }
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    if positional.len() != 2 {
        bail!("{}", usage());
    }
    let output = positional.pop().context(usage())?;
    let input = positional.pop().context(usage())?;

    Ok(Args {
        input,
        output,
        level,
        block,
        settings,
    })
}

/// Read every sample as interleaved normalized floats.
fn read_wav(path: &PathBuf) -> Result<(WavSpec, Vec<f32>)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok((spec, samples))
}

fn write_wav(path: &PathBuf, spec: WavSpec, samples: &[f32]) -> Result<()> {
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create output WAV '{}'", path.display()))?;

    match spec.sample_format {
        SampleFormat::Float => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for &s in samples {
                let v = (s * scale).round().clamp(-scale, scale - 1.0) as i32;
                writer.write_sample(v)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let mut settings = match &args.settings {
        Some(path) => PipelineSettings::load(path)
            .with_context(|| format!("failed to load settings '{}'", path.display()))?,
        None => PipelineSettings::default(),
    };
    if let Some(level) = args.level {
        settings.initial_config.level = level;
    }

    let (spec, interleaved) = read_wav(&args.input)?;
    let channels = spec.channels as usize;
    let mut input = SampleBuffer::new(0, 0, spec.sample_rate);
    input.from_interleaved(&interleaved, channels);
    let total = input.num_samples();
    info!(
        "Loaded '{}': {} Hz, {} channel(s), {} samples",
        args.input.display(),
        spec.sample_rate,
        channels,
        total
    );

    let mut pipeline = NoiseReductionPipeline::with_rnnoise(settings)?;
    let handle = pipeline.handle();
    pipeline
        .initialize(spec.sample_rate, channels)
        .context("unsupported input format")?;
    let latency = pipeline.latency_samples();

    // Feed `latency` extra samples of silence so the tail comes out, then drop
    // the leading delay.
    let padded = total + latency;
    let mut output = SampleBuffer::new(channels, padded, spec.sample_rate);
    let mut block = SampleBuffer::new(channels, args.block, spec.sample_rate);

    let mut start = 0;
    while start < padded {
        let n = args.block.min(padded - start);
        block.resize(channels, n, true);
        for ch in 0..channels {
            block.copy_from(ch, 0, &input, ch, start, n);
        }
        pipeline.process(&mut block);
        for ch in 0..channels {
            output.copy_from(ch, start, &block, ch, 0, n);
        }
        start += n;
        handle.drain_events_to_log();
    }

    let mut aligned = SampleBuffer::new(channels, total, spec.sample_rate);
    for ch in 0..channels {
        aligned.copy_from(ch, 0, &output, ch, latency, total);
    }
    let mut out_interleaved = Vec::new();
    aligned.to_interleaved(&mut out_interleaved);
    write_wav(&args.output, spec, &out_interleaved)?;

    pipeline.shutdown();
    handle.drain_events_to_log();

    let stats = handle.stats();
    println!("Denoise summary for '{}':", args.input.display());
    println!("  output             : {}", args.output.display());
    println!("  level              : {}", handle.level().name());
    println!("  frames processed   : {}", stats.frames_processed);
    println!("  frames failed      : {}", stats.frames_failed);
    println!("  average reduction  : {:.2} dB", stats.average_reduction_db);
    println!("  smoothed reduction : {:.2} dB", stats.reduction_level_db);
    println!("  voice probability  : {:.3}", stats.voice_probability);
    println!("  cpu load           : {:.1}%", stats.cpu_load_percent);
    println!("  time per frame     : {:.3} ms", stats.latency_ms);
    println!("  pipeline delay     : {} samples", latency);
    if aligned.has_clipped() {
        println!("  warning            : output clipped");
    }
    Ok(())
}
