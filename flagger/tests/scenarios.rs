//! End-to-end flagging of synthetic observations.

use flagger::data::{ImageSet, TimeFrequencyData};
use flagger::detection::ThresholdSequence;
use flagger::image_proc::mask::{flagged_count, flagged_fraction};
use flagger::render::save_flagged_png;
use flagger::strategy::{DefaultStrategy, Stage, Strategy, StrategyConfig};
use flagger::testset::{gaussian_image_set, RfiPattern};
use ndarray::s;
use test_helpers::{init_logging, output_subdir};

const CHANNELS: usize = 256;
const TIME_STEPS: usize = 1000;

#[test]
fn test_zero_data_is_never_flagged() {
    init_logging();
    for count in [1, 2, 4, 8] {
        let set = ImageSet::new(TIME_STEPS, CHANNELS, count, 0.0).unwrap();
        let mask = DefaultStrategy::default().run(&set, None).unwrap();
        assert_eq!(mask.dim(), (CHANNELS, TIME_STEPS));
        assert_eq!(flagged_count(mask.view()), 0, "{count} image(s)");
    }
}

fn longest_run(flags: impl Iterator<Item = bool>) -> usize {
    let (mut best, mut current) = (0, 0);
    for flagged in flags {
        current = if flagged { current + 1 } else { 0 };
        best = best.max(current);
    }
    best
}

#[test]
fn test_one_sigma_burst_on_single_image() {
    init_logging();
    for seed in [1, 2, 3] {
        let mut set = gaussian_image_set(TIME_STEPS, CHANNELS, 1, 1.0, seed).unwrap();
        RfiPattern::Block {
            channels: (77, 78),
            time_steps: (200, 400),
            amplitude: 1.0,
        }
        .inject_into_set(&mut set)
        .unwrap();

        let mask = DefaultStrategy::default().run(&set, None).unwrap();

        let run = longest_run(mask.slice(s![77, 200..400]).iter().copied());
        assert!(run >= 180, "seed {seed}: longest flagged run {run}");
        assert!(
            flagged_fraction(mask.view()) < 0.02,
            "seed {seed}: {:.2}% flagged",
            100.0 * flagged_fraction(mask.view())
        );
    }
}

#[test]
fn test_strong_burst_over_all_polarizations() {
    init_logging();
    let mut set = gaussian_image_set(TIME_STEPS, CHANNELS, 8, 1.0, 2024).unwrap();
    let burst = RfiPattern::Block {
        channels: (77, 78),
        time_steps: (200, 400),
        amplitude: 5.0,
    };
    burst.inject_into_set(&mut set).unwrap();

    let mask = DefaultStrategy::default().run(&set, None).unwrap();

    let burst_mask = mask.slice(s![77, 200..400]);
    let hit_rate = burst_mask.iter().filter(|&&m| m).count() as f64 / 200.0;
    assert!(hit_rate > 0.95, "only {:.1}% of the burst flagged", 100.0 * hit_rate);

    // Flags elsewhere: everything outside channel 77.
    let mut outside = mask.clone();
    outside.row_mut(77).fill(false);
    let elsewhere = flagged_count(outside.view()) as f64 / ((CHANNELS - 1) * TIME_STEPS) as f64;
    assert!(elsewhere < 0.02, "{:.2}% flagged outside the burst", 100.0 * elsewhere);

    let image = TimeFrequencyData::from_image_set(&set, None)
        .unwrap()
        .combined_amplitude()
        .unwrap();
    let path = output_subdir("masks").join("narrowband_burst.png");
    save_flagged_png(image.view(), mask.view(), &path).unwrap();
    assert!(path.exists());
}

#[test]
fn test_false_positive_rate_on_noise() {
    init_logging();
    let set = gaussian_image_set(400, CHANNELS, 8, 1.0, 99).unwrap();
    let mask = DefaultStrategy::default().run(&set, None).unwrap();
    let fraction = flagged_fraction(mask.view());
    assert!(fraction < 0.02, "false positive rate {:.2}%", 100.0 * fraction);
    assert!(fraction > 0.0);
}

#[test]
fn test_threshold_schedule() {
    let sequence = ThresholdSequence::new(1.4, 2.0, 3).unwrap();
    assert_eq!(sequence.factors(), &[4.0, 2.0]);

    let set = gaussian_image_set(120, 64, 1, 1.0, 5).unwrap();
    let mut data = TimeFrequencyData::from_image_set(&set, None).unwrap();
    let mut thresholds = Vec::new();
    DefaultStrategy::new(StrategyConfig::default())
        .unwrap()
        .flag_observed(&mut data, |stage, _| {
            if let Stage::Iteration { threshold, .. } = stage {
                thresholds.push(threshold);
            }
        })
        .unwrap();

    assert_eq!(thresholds.len(), 2);
    approx::assert_relative_eq!(thresholds[0], 5.6, epsilon = 1e-12);
    approx::assert_relative_eq!(thresholds[1], 2.8, epsilon = 1e-12);
}

#[test]
fn test_broadband_and_narrowband_together() {
    init_logging();
    let mut set = gaussian_image_set(500, 128, 4, 1.0, 17).unwrap();
    for pattern in [
        RfiPattern::Broadband {
            time_step: 250,
            amplitude: 8.0,
        },
        RfiPattern::Narrowband {
            channel: 40,
            amplitude: 8.0,
        },
    ] {
        pattern.inject_into_set(&mut set).unwrap();
    }

    let mask = DefaultStrategy::default().run(&set, None).unwrap();
    assert!(mask.column(250).iter().filter(|&&m| m).count() > 120);
    assert!(mask.row(40).iter().filter(|&&m| m).count() > 490);
    assert!(flagged_fraction(mask.view()) < 0.05);
}

#[test]
fn test_saved_configuration_reproduces_mask() {
    let config = StrategyConfig {
        iteration_count: 2,
        ..Default::default()
    };
    let path = output_subdir("strategies").join("two_iterations.json");
    config.save_to_file(&path).unwrap();
    let loaded = StrategyConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);

    let set = gaussian_image_set(200, 64, 2, 1.0, 8).unwrap();
    let expected = DefaultStrategy::new(config).unwrap().run(&set, None).unwrap();
    let mask = DefaultStrategy::new(loaded).unwrap().run(&set, None).unwrap();
    assert_eq!(mask, expected);
}
