use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::process;

use parvoc::args::{Cli, Commands, ResynthArgs};
use parvoc::audio;
use parvoc::config::AnalysisConfig;
use parvoc::flags::Flags;
use parvoc::modify::Modification;
use parvoc::vocoder::pipeline;
use parvoc::vocoder::synthesis::synthesize;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Info { input, config }) => {
            let config = load_config(config.as_deref())?;
            init_threads(&config)?;
            info(&input, &config)
        }
        None => resynthesize(cli.resynth),
    }
}

/// Explicit path, else `config.kdl` in the user config directory, else
/// defaults.
fn load_config(explicit: Option<&Path>) -> Result<AnalysisConfig> {
    if let Some(path) = explicit {
        return AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    let default_path: Option<PathBuf> = ProjectDirs::from("com", "parvoc", "parvoc")
        .map(|dirs| dirs.config_dir().join("config.kdl"));
    match default_path {
        Some(path) if path.exists() => {
            log::info!("Using config {}", path.display());
            AnalysisConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        _ => Ok(AnalysisConfig::default()),
    }
}

fn init_threads(config: &AnalysisConfig) -> Result<()> {
    let threads = config.threads();
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }
    Ok(())
}

fn info(input: &Path, config: &AnalysisConfig) -> Result<()> {
    let waveform = audio::load_waveform(input)
        .with_context(|| format!("Failed to load audio from {}", input.display()))?;
    let params = pipeline::analyze(&waveform, config).context("Analysis failed")?;
    let frames = params.frame_count();
    let voiced = params.f0.iter().filter(|&&f| f > 0.0).count();
    let ratio = if frames == 0 { 0.0 } else { voiced as f64 / frames as f64 };
    println!("sample rate:  {} Hz", waveform.sample_rate);
    println!("duration:     {:.3} s", waveform.duration());
    println!("frames:       {} ({} ms)", frames, params.frame_period);
    println!("fft size:     {}", params.fft_size());
    println!("voiced ratio: {:.3}", ratio);
    Ok(())
}

fn resynthesize(args: ResynthArgs) -> Result<()> {
    let input = args.input.context("No input file given")?;
    let output = args.output.context("No output file given")?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(estimator) = args.estimator {
        config = config.with_estimator(estimator);
    }
    if let Some(frame_period) = args.frame_period {
        config = config.with_frame_period(frame_period);
    }
    init_threads(&config)?;
    let flags: Flags = args.flags.parse().context("Failed to parse flags")?;

    let waveform = audio::load_waveform(&input)
        .with_context(|| format!("Failed to load audio from {}", input.display()))?;
    if waveform.is_empty() {
        log::warn!("Input is empty, writing an empty file");
        return audio::save_wav(&output, &[], waveform.sample_rate)
            .with_context(|| format!("Failed to save audio to {}", output.display()));
    }

    let params = pipeline::analyze(&waveform, &config).context("Analysis failed")?;
    let params = Modification::from(flags).apply(&params).context("Failed to apply flags")?;
    let samples = synthesize(&params).context("Synthesis failed")?;

    audio::save_wav(&output, &samples, waveform.sample_rate)
        .with_context(|| format!("Failed to save audio to {}", output.display()))?;
    log::info!("Wrote {} samples to {}", samples.len(), output.display());
    Ok(())
}
