mod samples;

use powerfuzz_core::config::FuzzConfig;
use powerfuzz_core::corpus::{CorpusStore, Population, dump_population, load_population};
use powerfuzz_core::executor::InProcessRunner;
use powerfuzz_core::fuzzer::Fuzzer;
use powerfuzz_core::mutator::HavocMutator;
use powerfuzz_core::report::{DEFAULT_RESULTS_DIR, RunSnapshot, load_snapshots};
use powerfuzz_core::seed::PathFingerprint;

use clap::{Parser, Subcommand};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use samples::Sample;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::{
    FmtSubscriber,
    filter::{EnvFilter, LevelFilter},
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fuzz one of the built-in sample targets.
    Run {
        #[clap(short, long)]
        sample: u32,
        /// Run time in seconds; overrides the configuration.
        #[clap(short, long)]
        time: Option<u64>,
        #[clap(short, long, value_parser)]
        config: Option<PathBuf>,
        #[clap(long)]
        rng_seed: Option<u64>,
        #[clap(long, default_value = DEFAULT_RESULTS_DIR)]
        results_dir: PathBuf,
    },
    /// Print the stored result snapshots.
    Results {
        #[clap(short, long, default_value = DEFAULT_RESULTS_DIR)]
        dir: PathBuf,
    },
}

fn load_config(config_path: Option<PathBuf>) -> Result<FuzzConfig, anyhow::Error> {
    match config_path {
        Some(config_path) => {
            tracing::info!("Loading configuration from specified path: {config_path:?}");
            FuzzConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("powerfuzz.toml");
            if default_config_path.exists() {
                tracing::info!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                FuzzConfig::load_from_file(&default_config_path)
            } else {
                tracing::info!(
                    "No config file specified and default 'powerfuzz.toml' not found, using built-in defaults."
                );
                Ok(FuzzConfig::default())
            }
        }
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Fuzzes `sample` as configured and writes its snapshot into `results_dir`.
fn run_sample(
    sample: &Sample,
    config: &FuzzConfig,
    results_dir: &Path,
) -> Result<RunSnapshot, anyhow::Error> {
    let strategy = config.strategy_for(sample.id);
    let rng_seed = config.fuzzer.rng_seed.unwrap_or_else(clock_seed);
    tracing::info!(
        sample = sample.name,
        schedule = ?strategy.schedule,
        rng_seed,
        "configuring campaign"
    );

    let corpus_conf = &config.corpus;
    let mut corpus = CorpusStore::open(&corpus_conf.on_disk_path, corpus_conf.max_resident)?
        .with_eviction_seed(rng_seed);
    let population = load_population(&corpus_conf.population_file)?;
    corpus.import_population(population)?;
    corpus.load_initial_seeds(&corpus_conf.seed_paths)?;
    if corpus.is_empty() {
        for seed in sample.default_seeds {
            corpus.add(seed.to_vec(), PathFingerprint::new())?;
        }
    }

    let mut fuzzer = Fuzzer::new(
        corpus,
        strategy.schedule.build(),
        HavocMutator::new(strategy.operators),
        ChaCha8Rng::seed_from_u64(rng_seed),
    )
    .with_stats_interval(Duration::from_millis(config.fuzzer.stats_interval_ms));
    let mut runner = InProcessRunner::new(sample.harness);

    // Crashes are expected and recorded; keep their panic messages off stderr.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let started = SystemTime::now();
    let run_result = fuzzer.run_for(
        &mut runner,
        Duration::from_secs(config.fuzzer.run_time_secs),
    );
    let finished = SystemTime::now();
    std::panic::set_hook(default_hook);
    let stats = run_result?;

    dump_population(
        &corpus_conf.population_file,
        &fuzzer.corpus().export_population()?,
    )?;

    let snapshot = RunSnapshot::capture(
        sample.name,
        fuzzer.coverage(),
        fuzzer.crashes(),
        started,
        finished,
    );
    let snapshot_path = RunSnapshot::path_for(results_dir, sample.id);
    snapshot.save(&snapshot_path)?;
    tracing::info!("{stats}");
    tracing::info!("saved results to {snapshot_path:?}");
    Ok(snapshot)
}

fn show_results(dir: &Path) -> Result<usize, anyhow::Error> {
    let snapshots = load_snapshots(dir)?;
    if snapshots.is_empty() {
        println!("No results found in {dir:?}");
    }
    for (path, snapshot) in &snapshots {
        println!("{}", path.display());
        println!("  {snapshot}");
    }
    Ok(snapshots.len())
}

fn main() -> Result<(), anyhow::Error> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            sample,
            time,
            config,
            rng_seed,
            results_dir,
        } => {
            let sample = samples::find(sample).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown sample {sample}; expected one of {:?}",
                    samples::SAMPLES.iter().map(|s| s.id).collect::<Vec<_>>()
                )
            })?;
            let mut config = load_config(config)?;
            if let Some(time) = time {
                config.fuzzer.run_time_secs = time;
            }
            if rng_seed.is_some() {
                config.fuzzer.rng_seed = rng_seed;
            }
            let snapshot = run_sample(sample, &config, &results_dir)?;
            println!("{snapshot}");
        }
        Command::Results { dir } => {
            show_results(&dir)?;
        }
    }
    Ok(())
}
