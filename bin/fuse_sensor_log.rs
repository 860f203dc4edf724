use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use imu_gnss_fusion::estimator::{EstimatorWorker, FusionConfig, FusionEstimator};
use imu_gnss_fusion::geodetic::{FixConverter, GeodeticConfig};
use imu_gnss_fusion::imu::{ImuSample, InertialFactorKind};
use imu_gnss_fusion::io::{SensorLog, SensorRecord, TumPose, TumWriter};
use imu_gnss_fusion::logger::{init_logger_with_level, parse_level};
use imu_gnss_fusion::manifold::Pose3;
use imu_gnss_fusion::{AbsoluteFix, EpochOutput, FusionError, FusionResult, SensorEvent};
use nalgebra::{Rotation3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fuse_sensor_log")]
#[command(about = "Replay IMU and position-fix logs through the factor-graph estimator")]
struct Args {
    /// Default log level: error, warn, info, debug or trace (RUST_LOG overrides)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuse a recorded sensor log and write the solved trajectory
    Run {
        /// Sensor log (`imu`, `fix` and `gnss` records)
        #[arg(short, long)]
        log: PathBuf,

        /// TOML configuration: estimator settings plus an optional [geodetic] table
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write solved epochs as a TUM trajectory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Estimate the bias inside a 15-dimensional inertial constraint
        #[arg(long)]
        combined: bool,

        /// Feed events through the estimator worker thread
        #[arg(long)]
        worker: bool,

        /// Event queue capacity for --worker
        #[arg(long, default_value = "1024")]
        capacity: usize,
    },

    /// Write a synthetic sensor log with known ground truth
    Simulate {
        /// Destination of the generated log
        #[arg(short, long)]
        output: PathBuf,

        /// Number of fixes
        #[arg(short, long, default_value = "20")]
        epochs: usize,

        /// IMU samples between consecutive fixes
        #[arg(long, default_value = "200")]
        samples_per_epoch: usize,

        /// IMU sample interval in seconds
        #[arg(long, default_value = "0.005")]
        dt: f64,

        /// Body-frame forward acceleration in m/s²
        #[arg(long, default_value = "0.2")]
        acceleration: f64,

        /// Yaw rate in rad/s
        #[arg(long, default_value = "0.05")]
        yaw_rate: f64,

        /// Half-width of the uniform noise added to fix positions, in m
        #[arg(long, default_value = "0.0")]
        fix_noise: f64,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Also write the ground-truth trajectory in TUM format
        #[arg(long)]
        ground_truth: Option<PathBuf>,
    },
}

/// Replay configuration file: estimator settings at the top level and the
/// geodetic reference used to convert `gnss` records.
#[derive(Debug, Default, Deserialize)]
struct ReplayConfig {
    #[serde(flatten)]
    fusion: FusionConfig,
    #[serde(default)]
    geodetic: Option<GeodeticConfig>,
}

impl ReplayConfig {
    fn load(path: &Path) -> FusionResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[derive(Debug, Default)]
struct ReplayStats {
    solved: usize,
    not_converged: usize,
    skipped_fixes: usize,
    rejected: usize,
    max_position_discrepancy: f64,
}

impl ReplayStats {
    fn record(&mut self, output: &EpochOutput) {
        self.solved += 1;
        if !output.converged {
            self.not_converged += 1;
        }
        self.max_position_discrepancy = self
            .max_position_discrepancy
            .max(output.diagnostics.position_discrepancy);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = parse_level(&args.log_level)
        .ok_or_else(|| format!("unknown log level '{}'", args.log_level))?;
    init_logger_with_level(level);

    match args.command {
        Command::Run {
            log,
            config,
            output,
            combined,
            worker,
            capacity,
        } => {
            let mut replay = match config {
                Some(path) => ReplayConfig::load(&path)?,
                None => ReplayConfig::default(),
            };
            if combined {
                replay.fusion.inertial_factor = InertialFactorKind::Combined;
            }
            run(&log, replay, output.as_deref(), worker.then_some(capacity))?;
        }
        Command::Simulate {
            output,
            epochs,
            samples_per_epoch,
            dt,
            acceleration,
            yaw_rate,
            fix_noise,
            seed,
            ground_truth,
        } => {
            let simulation = Simulation {
                epochs,
                samples_per_epoch,
                dt,
                acceleration,
                yaw_rate,
                fix_noise,
                seed,
            };
            let (log, truth) = simulation.generate();
            log.save(&output)?;
            info!(
                records = log.len(),
                fixes = epochs,
                path = %output.display(),
                "synthetic log written"
            );

            if let Some(path) = ground_truth {
                let mut writer = TumWriter::create(&path)?;
                for (timestamp, pose) in &truth {
                    writer.write_pose(&TumPose::new(*timestamp, pose.clone()))?;
                }
                writer.flush()?;
            }
        }
    }
    Ok(())
}

fn run(
    log_path: &Path,
    replay: ReplayConfig,
    output: Option<&Path>,
    worker_capacity: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let load_start = Instant::now();
    let log = SensorLog::load(log_path)?;
    let converter = replay
        .geodetic
        .as_ref()
        .map(FixConverter::from_config)
        .transpose()?;
    let events = log.events(converter.as_ref())?;
    info!(
        records = log.len(),
        imu_samples = log.imu_count(),
        elapsed = ?load_start.elapsed(),
        "sensor log loaded"
    );

    let estimator = FusionEstimator::new(replay.fusion)?;
    let solve_start = Instant::now();
    let mut stats = ReplayStats::default();

    let outputs: Vec<EpochOutput> = match worker_capacity {
        Some(capacity) => {
            let worker = EstimatorWorker::spawn(estimator, capacity)?;
            let fix_count = events
                .iter()
                .filter(|event| matches!(event, SensorEvent::Fix(_)))
                .count();
            for event in events {
                worker.submit(event)?;
            }
            let (estimator, results) = worker.shutdown()?;
            let mut outputs = Vec::with_capacity(results.len());
            let mut rejected_fixes = 0;
            for result in results {
                match result {
                    Ok(output) => outputs.push(output),
                    Err(e) => {
                        stats.rejected += 1;
                        if matches!(e, FusionError::OutOfOrder { stream: "fix", .. }) {
                            rejected_fixes += 1;
                        }
                    }
                }
            }
            stats.skipped_fixes = fix_count.saturating_sub(outputs.len() + rejected_fixes);
            info!(epochs = estimator.epoch_count(), "worker finished");
            outputs
        }
        None => {
            let mut estimator = estimator;
            let mut outputs = Vec::new();
            for event in events {
                let is_fix = matches!(event, SensorEvent::Fix(_));
                match estimator.handle(event) {
                    Ok(Some(output)) => outputs.push(output),
                    Ok(None) if is_fix => stats.skipped_fixes += 1,
                    Ok(None) => {}
                    Err(
                        e @ (FusionError::OutOfOrder { .. } | FusionError::InvalidMeasurement(_)),
                    ) => {
                        stats.rejected += 1;
                        warn!(error = %e, "event rejected");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            outputs
        }
    };
    for output in &outputs {
        stats.record(output);
    }

    if let Some(path) = output {
        let mut writer = TumWriter::create(path)?;
        for epoch in &outputs {
            writer.write_epoch(epoch)?;
        }
        writer.flush()?;
        info!(poses = writer.written(), path = %path.display(), "trajectory written");
    }

    print_summary(&stats, outputs.last(), solve_start.elapsed().as_millis());
    Ok(())
}

fn print_summary(stats: &ReplayStats, last: Option<&EpochOutput>, elapsed_ms: u128) {
    println!("\n{}", "=".repeat(60));
    println!("=== REPLAY SUMMARY ===\n");
    println!("{:<28} {}", "Epochs solved", stats.solved);
    println!("{:<28} {}", "Not converged", stats.not_converged);
    println!("{:<28} {}", "Skipped fixes", stats.skipped_fixes);
    println!("{:<28} {}", "Rejected events", stats.rejected);
    println!(
        "{:<28} {:.3} m",
        "Max fix discrepancy", stats.max_position_discrepancy
    );
    println!("{:<28} {} ms", "Total time", elapsed_ms);
    if let Some(last) = last {
        let p = last.snapshot.position();
        println!(
            "{:<28} [{:.3}, {:.3}, {:.3}] at t = {:.3}",
            "Final position", p.x, p.y, p.z, last.timestamp
        );
        println!("{:<28} {}", "Final bias", last.snapshot.bias);
    }
    println!("{}", "=".repeat(60));
}

/// Planar motion with constant body acceleration and yaw rate.
struct Simulation {
    epochs: usize,
    samples_per_epoch: usize,
    dt: f64,
    acceleration: f64,
    yaw_rate: f64,
    fix_noise: f64,
    seed: u64,
}

impl Simulation {
    fn generate(&self) -> (SensorLog, Vec<(f64, Pose3)>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut records = Vec::with_capacity(self.epochs * (self.samples_per_epoch + 1));
        let mut truth = Vec::with_capacity(self.epochs);

        let acc_body = Vector3::new(self.acceleration, 0.0, 0.0);
        let gyro = Vector3::new(0.0, 0.0, self.yaw_rate);
        let mut rotation = Rotation3::identity();
        let mut velocity = Vector3::zeros();
        let mut position = Vector3::zeros();
        let mut t = 0.0;

        for _ in 0..self.epochs {
            for _ in 0..self.samples_per_epoch {
                t += self.dt;
                let acc_world = rotation * acc_body;
                position += velocity * self.dt + 0.5 * acc_world * self.dt * self.dt;
                velocity += acc_world * self.dt;
                rotation *= Rotation3::new(gyro * self.dt);
                records.push(SensorRecord::Imu(ImuSample::new(t, acc_body, gyro)));
            }

            let noise = if self.fix_noise > 0.0 {
                Vector3::new(
                    rng.random_range(-self.fix_noise..self.fix_noise),
                    rng.random_range(-self.fix_noise..self.fix_noise),
                    0.0,
                )
            } else {
                Vector3::zeros()
            };
            records.push(SensorRecord::Fix(AbsoluteFix::new(t, position + noise)));
            truth.push((
                t,
                Pose3::from_quaternion_translation(
                    UnitQuaternion::from_rotation_matrix(&rotation),
                    position,
                ),
            ));
        }

        (SensorLog::new(records), truth)
    }
}
