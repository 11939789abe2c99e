//! Flag synthetic observations and report how well the injected RFI is found.
//!
//! `run` generates Gaussian noise, adds RFI patterns, flags it with a chosen
//! strategy and prints per-trial statistics. `default-config` writes the
//! default strategy configuration as JSON, ready to be edited and passed back
//! with `--config`.

use clap::{Parser, Subcommand};
use flagger::image_proc::mask::{flagged_count, flagged_fraction};
use flagger::render::save_flagged_png;
use flagger::strategy::{strategy_by_name, Strategy, StrategyConfig};
use flagger::testset::{gaussian_image_set, RfiPattern};
use flagger::{FlagError, TimeFrequencyData};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Zip};
use rayon::prelude::*;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "flag_synthetic",
    about = "Runs RFI flagging strategies on synthetic noise",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flag synthetic observations and report statistics
    Run(RunArgs),
    /// Write the default strategy configuration
    DefaultConfig {
        /// Output JSON file
        #[arg(short, long, default_value = "strategy.json")]
        output: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Number of time steps
    #[arg(long, default_value_t = 1000)]
    width: usize,

    /// Number of frequency channels
    #[arg(long, default_value_t = 256)]
    height: usize,

    /// Image buffers per observation (1, 2, 4 or 8)
    #[arg(long, default_value_t = 8)]
    images: usize,

    /// Standard deviation of the noise
    #[arg(long, default_value_t = 1.0)]
    std_dev: f64,

    /// Seed of the first trial
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of observations to flag (different noise seeds)
    #[arg(long, default_value_t = 1)]
    trials: usize,

    /// Strategy to use (default, sumthreshold)
    #[arg(long, default_value = "default")]
    strategy: String,

    /// Strategy configuration JSON (see `default-config`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// RFI to inject, e.g. "block:70-80:200-400:5", "narrowband:12:3" or
    /// "broadband:500:4"
    #[arg(long, value_parser = parse_rfi_pattern)]
    rfi: Vec<RfiPattern>,

    /// Write the first trial's flagged image as PNG
    #[arg(long)]
    png: Option<PathBuf>,

    /// Run trials serially instead of in parallel
    #[arg(long, default_value_t = false)]
    serial: bool,
}

fn parse_range(s: &str) -> Result<(usize, usize), String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("expected a range like 10-20, got '{s}'"))?;
    let start = start.trim().parse().map_err(|e| format!("bad range start: {e}"))?;
    let end = end.trim().parse().map_err(|e| format!("bad range end: {e}"))?;
    Ok((start, end))
}

fn parse_rfi_pattern(s: &str) -> Result<RfiPattern, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let amplitude = |text: &str| {
        text.parse::<f64>()
            .map_err(|e| format!("bad amplitude '{text}': {e}"))
    };
    let index = |text: &str| {
        text.parse::<usize>()
            .map_err(|e| format!("bad index '{text}': {e}"))
    };
    match parts.as_slice() {
        ["block", channels, time_steps, amp] => Ok(RfiPattern::Block {
            channels: parse_range(channels)?,
            time_steps: parse_range(time_steps)?,
            amplitude: amplitude(amp)?,
        }),
        ["narrowband", channel, amp] => Ok(RfiPattern::Narrowband {
            channel: index(channel)?,
            amplitude: amplitude(amp)?,
        }),
        ["broadband", time_step, amp] => Ok(RfiPattern::Broadband {
            time_step: index(time_step)?,
            amplitude: amplitude(amp)?,
        }),
        _ => Err(format!(
            "unknown RFI pattern '{s}' (block:C0-C1:T0-T1:A, narrowband:C:A, broadband:T:A)"
        )),
    }
}

/// Outcome of flagging one synthetic observation.
#[derive(Debug)]
struct TrialResult {
    seed: u64,
    flagged_fraction: f64,
    /// Fraction of injected samples that were flagged.
    detection_rate: Option<f64>,
    /// Fraction of clean samples that were flagged.
    false_positive_rate: f64,
}

fn run_trial(
    args: &RunArgs,
    strategy: &dyn Strategy,
    seed: u64,
    png: Option<&PathBuf>,
) -> Result<TrialResult, FlagError> {
    let mut set = gaussian_image_set(args.width, args.height, args.images, args.std_dev, seed)?;
    let shape = set.shape();
    let mut truth = Array2::from_elem(shape, false);
    for pattern in &args.rfi {
        pattern.inject_into_set(&mut set)?;
        flagger::image_proc::join_into(&mut truth, pattern.mask(shape)?.view())?;
    }

    let mask = strategy.run(&set, None)?;

    let mut hits = 0usize;
    let mut false_alarms = 0usize;
    Zip::from(&mask).and(&truth).for_each(|&flagged, &injected| {
        if flagged && injected {
            hits += 1;
        } else if flagged {
            false_alarms += 1;
        }
    });
    let injected = flagged_count(truth.view());
    let clean = truth.len() - injected;

    if let Some(path) = png {
        let image = TimeFrequencyData::from_image_set(&set, None)?.combined_amplitude()?;
        save_flagged_png(image.view(), mask.view(), path)?;
        log::info!("Wrote {}", path.display());
    }

    Ok(TrialResult {
        seed,
        flagged_fraction: flagged_fraction(mask.view()),
        detection_rate: (injected > 0).then(|| hits as f64 / injected as f64),
        false_positive_rate: if clean > 0 {
            false_alarms as f64 / clean as f64
        } else {
            0.0
        },
    })
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => StrategyConfig::load_from_file(path)?,
        None => StrategyConfig::default(),
    };
    let strategy = strategy_by_name(&args.strategy, config)?;

    println!("Strategy: {}", strategy.name());
    println!(
        "Observation: {} channels x {} time steps, {} image(s)",
        args.height, args.width, args.images
    );
    for pattern in &args.rfi {
        println!("Injected: {pattern:?}");
    }

    let pb = ProgressBar::new(args.trials as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("=>-"),
    );
    pb.set_message("Flagging");

    let trial = |index: usize| {
        let seed = args.seed + (index * args.images) as u64;
        let png = if index == 0 { args.png.as_ref() } else { None };
        let result = run_trial(&args, strategy.as_ref(), seed, png);
        pb.inc(1);
        result
    };
    let results: Vec<Result<TrialResult, FlagError>> = if args.serial {
        (0..args.trials).map(trial).collect()
    } else {
        (0..args.trials).into_par_iter().map(trial).collect()
    };
    pb.finish_with_message("Done");

    println!("\n{:>8} {:>10} {:>10} {:>10}", "seed", "flagged", "detected", "false pos");
    let mut fractions = Vec::with_capacity(results.len());
    for result in results {
        let result = result?;
        let detected = result
            .detection_rate
            .map_or_else(|| "-".to_string(), |rate| format!("{:.2}%", 100.0 * rate));
        println!(
            "{:>8} {:>9.3}% {:>10} {:>9.3}%",
            result.seed,
            100.0 * result.flagged_fraction,
            detected,
            100.0 * result.false_positive_rate
        );
        fractions.push(result.flagged_fraction);
    }
    if !fractions.is_empty() {
        let mean = fractions.iter().sum::<f64>() / fractions.len() as f64;
        println!("\nMean flagged fraction: {:.3}%", 100.0 * mean);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    match args.command {
        Command::Run(run_args) => run(run_args),
        Command::DefaultConfig { output } => {
            StrategyConfig::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
    }
}
