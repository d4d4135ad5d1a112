//! Offline render: run a WAV file through the voice pipeline.
//!
//! usage: render_wav <input.wav> <output.wav> [preset] [calibrate_secs]
//!
//! `calibrate_secs` takes the noise profile from the start of the input.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use orionwave::config::EngineConfig;
use orionwave::device::BufferSource;
use orionwave::VoicePipeline;
use std::path::PathBuf;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input = args
        .next()
        .map(PathBuf::from)
        .context("missing input WAV path")?;
    let output = args
        .next()
        .map(PathBuf::from)
        .context("missing output WAV path")?;
    let preset = args.next().unwrap_or_else(|| "natural".to_string());
    let calibrate_secs: Option<f32> = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("calibrate_secs must be a number")?;

    let reader = WavReader::open(&input)
        .with_context(|| format!("failed to open input WAV '{}'", input.display()))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!("render only supports 16-bit integer WAV input");
    }

    // Fold to mono by taking the first channel.
    let channels = spec.channels.max(1) as usize;
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .step_by(channels)
        .collect::<Result<_, _>>()
        .context("failed to decode input samples")?;

    let mut config = EngineConfig::default();
    config.sample_rate = spec.sample_rate;
    config.stats_path = None;
    let chunk = config.chunk_size;
    let (mut pipeline, handle) = VoicePipeline::new(config)?;
    handle
        .load_preset_named(&preset)
        .with_context(|| format!("cannot load preset '{}'", preset))?;

    if let Some(secs) = calibrate_secs {
        let mut noise = BufferSource::new(samples.clone(), chunk);
        handle
            .calibrate_noise(&mut noise, secs)
            .context("noise calibration failed")?;
    }

    let out_spec = WavSpec {
        channels: 1,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&output, out_spec)
        .with_context(|| format!("failed to create output WAV '{}'", output.display()))?;

    let mut frames = 0usize;
    let mut active = 0usize;
    for block in samples.chunks(chunk) {
        let out = pipeline.process_frame(block);
        frames += 1;
        if out.voice_active {
            active += 1;
        }
        for &s in out.frame.samples() {
            writer.write_sample(s)?;
        }
    }
    writer.finalize()?;
    handle.stop_automation();

    let stats = handle.get_stats();
    println!("Render summary for '{}':", input.display());
    println!("  preset           : {}", preset);
    println!("  frames processed : {}", frames);
    println!("  voice active     : {}", active);
    println!("  stage failures   : {}", stats.stage_failures);
    println!("  avg frame time   : {:.3} ms", stats.latency_avg_ms);
    if let Some(lufs) = stats.output_loudness_lufs {
        println!("  output loudness  : {:.1} LUFS (momentary)", lufs);
    }
    println!("  written to       : {}", output.display());
    Ok(())
}
