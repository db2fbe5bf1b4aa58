//! # aggsim
//!
//! CLI runner for the aggsim aggregation-overlay simulator.
//!
//! Subcommands:
//! - `run`: execute a simulation and stream per-second measurements to stdout
//! - `gen-keys`: write deterministic replay key files
//! - `topology`: print the tree layout and GC delays for a configuration

use aggsim_keys::{gen, FileKeySource, KeyFileSpec};
use aggsim_model::{GcPlan, GcPolicy, SimConfig, Topology};
use aggsim_runner::{metrics_export, InMemoryRecorder, RunnerError, Simulation};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Configuration
// ============================================================================

/// Output format for metrics at end of simulation.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MetricsOutputFormat {
    /// JSON format for programmatic consumption.
    Json,
    /// Prometheus text exposition format.
    Prometheus,
}

/// aggsim - datacenter aggregation-overlay simulator
#[derive(Parser, Debug)]
#[command(name = "aggsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Raise the default log level to debug.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation
    Run(RunConfig),
    /// Generate deterministic replay key files
    GenKeys(GenKeysConfig),
    /// Print the tree layout and GC delays for a configuration
    Topology(TopologyConfig),
}

/// Configuration for one simulation run.
#[derive(Parser, Debug)]
pub struct RunConfig {
    /// Number of racks.
    #[arg(long, default_value_t = 1)]
    pub nracks: usize,

    /// Nodes per rack; index 0 within a rack is the rack hub.
    #[arg(long, default_value_t = 1)]
    pub nodes_per_rack: usize,

    /// Fanout of the rack-level tree.
    #[arg(long, default_value_t = 2)]
    pub fanout: usize,

    /// Build max(2, fanout - 1) trees instead of one.
    #[arg(long)]
    pub multitree: bool,

    /// Self-generated messages per node per second.
    #[arg(long, default_value_t = 4000)]
    pub msg_rate: i64,

    /// Wire size of one message in bytes.
    #[arg(long, default_value_t = 32)]
    pub msg_size: i64,

    /// GC policy: 0 none, 1 uniform, 2 decreasing-down, 3 increasing-down.
    #[arg(long, default_value_t = 0)]
    pub gc_policy: u8,

    /// Compaction runs every this many ticks.
    #[arg(long, default_value_t = 10)]
    pub gc_period: i64,

    /// Accumulated delay budget from leaf to root, in ticks.
    #[arg(long, default_value_t = 100)]
    pub gc_acc_delay: i64,

    /// Inbound bandwidth limit per second at a node, bytes.
    #[arg(long, default_value_t = 125_000_000)]
    pub in_limit: i64,

    /// Outbound bandwidth limit per second at a node, bytes.
    #[arg(long, default_value_t = 125_000_000)]
    pub out_limit: i64,

    /// Inbound limit override for the rack-0 hub, bytes per second.
    #[arg(long)]
    pub in_limit_root: Option<i64>,

    /// Outbound limit override for the rack-0 hub, bytes per second.
    #[arg(long)]
    pub out_limit_root: Option<i64>,

    /// Simulated seconds to run.
    #[arg(long, default_value_t = 60)]
    pub duration: i64,

    /// Ticks per simulated second.
    #[arg(long, default_value_t = 1000)]
    pub ticks: i64,

    /// Worker threads for the parallel phases.
    #[arg(long, default_value_t = 1)]
    pub nthreads: usize,

    /// Directory holding the data-<fid> key files.
    #[arg(long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Write end-of-run totals as JSON here.
    #[arg(long)]
    pub stats_file: Option<PathBuf>,

    /// Export collected metrics in this format at end of run.
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsOutputFormat>,

    /// Write the metrics export here instead of stdout.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl RunConfig {
    fn to_sim_config(&self) -> Result<SimConfig, RunnerError> {
        let gc_policy = GcPolicy::from_id(self.gc_policy)?;
        Ok(SimConfig {
            nracks: self.nracks,
            nodes_per_rack: self.nodes_per_rack,
            fanout: self.fanout,
            multitree: self.multitree,
            msg_rate: self.msg_rate,
            msg_size: self.msg_size,
            gc_policy,
            gc_period: self.gc_period,
            gc_acc_delay: self.gc_acc_delay,
            in_limit: self.in_limit,
            out_limit: self.out_limit,
            in_limit_root: self.in_limit_root,
            out_limit_root: self.out_limit_root,
            duration: self.duration,
            ticks: self.ticks,
            nthreads: self.nthreads,
        })
    }
}

/// Configuration for key-file generation.
#[derive(Parser, Debug)]
pub struct GenKeysConfig {
    /// Output directory for the data-<fid> files. Must exist.
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Number of files to write.
    #[arg(long, default_value_t = 1)]
    pub files: u32,

    /// Keys per file.
    #[arg(long, default_value_t = 1_000_000)]
    pub keys_per_file: usize,

    /// Keys are drawn from [0, key_space).
    #[arg(long, default_value_t = 1_000_000)]
    pub key_space: u64,

    /// Zipf skew exponent; 0 draws uniformly.
    #[arg(long, default_value_t = 0.0)]
    pub zipf: f64,

    /// RNG seed for deterministic generation.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

/// Configuration for the topology listing.
#[derive(Parser, Debug)]
pub struct TopologyConfig {
    /// Number of racks.
    #[arg(long, default_value_t = 1)]
    pub nracks: usize,

    /// Nodes per rack.
    #[arg(long, default_value_t = 1)]
    pub nodes_per_rack: usize,

    /// Fanout of the rack-level tree.
    #[arg(long, default_value_t = 2)]
    pub fanout: usize,

    /// Build max(2, fanout - 1) trees instead of one.
    #[arg(long)]
    pub multitree: bool,

    /// GC policy: 0 none, 1 uniform, 2 decreasing-down, 3 increasing-down.
    #[arg(long, default_value_t = 0)]
    pub gc_policy: u8,

    /// Accumulated delay budget from leaf to root, in ticks.
    #[arg(long, default_value_t = 100)]
    pub gc_acc_delay: i64,
}

// ============================================================================
// Command Implementations
// ============================================================================

fn run_simulation(config: &RunConfig) -> Result<(), RunnerError> {
    let sim_config = config.to_sim_config()?;
    sim_config.validate()?;

    let recorder = InMemoryRecorder::new();
    if config.metrics_output.is_some() && !recorder.install() {
        error!("a metrics recorder is already installed; export disabled");
    }

    let keys = Arc::new(FileKeySource::new(&config.data_dir));
    let mut sim = Simulation::new(sim_config, keys, Box::new(std::io::stdout()))?;
    let stats = sim.run()?;

    if let Some(path) = &config.stats_file {
        let mut file = File::create(path)?;
        serde_json::to_writer_pretty(&mut file, &stats)?;
        writeln!(file)?;
        info!(path = %path.display(), "wrote run stats");
    }

    if let Some(format) = config.metrics_output {
        let snapshot = recorder.snapshot();
        let mut sink: Box<dyn Write> = match &config.metrics_file {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(std::io::stdout()),
        };
        match format {
            MetricsOutputFormat::Json => metrics_export::export_json(&snapshot, &mut sink)?,
            MetricsOutputFormat::Prometheus => {
                metrics_export::export_prometheus(&snapshot, &mut sink)?
            }
        }
    }

    Ok(())
}

fn gen_keys(config: &GenKeysConfig) -> Result<(), RunnerError> {
    let spec = KeyFileSpec {
        dir: config.out_dir.clone(),
        files: config.files,
        keys_per_file: config.keys_per_file,
        key_space: config.key_space,
        zipf_exponent: config.zipf,
        seed: config.seed,
    };
    let paths = gen::generate(&spec)?;
    for path in paths {
        info!(path = %path.display(), "wrote key file");
    }
    Ok(())
}

fn print_topology(config: &TopologyConfig) -> Result<(), RunnerError> {
    let sim_config = SimConfig {
        nracks: config.nracks,
        nodes_per_rack: config.nodes_per_rack,
        fanout: config.fanout,
        multitree: config.multitree,
        gc_policy: GcPolicy::from_id(config.gc_policy)?,
        gc_acc_delay: config.gc_acc_delay,
        ..SimConfig::default()
    };
    sim_config.validate()?;
    let topology = Topology::build(&sim_config)?;
    let plan = GcPlan::assign(&topology, &sim_config);

    println!(
        "{} racks x {} nodes, fanout {}, {} tree(s), policy {}",
        sim_config.nracks,
        sim_config.nodes_per_rack,
        sim_config.fanout,
        topology.tree_count,
        sim_config.gc_policy.as_label()
    );
    for (k, tree) in topology.trees.iter().enumerate() {
        println!("tree {}:", k);
        for &hub in tree {
            let level = topology.level[hub][k].map(i64::from).unwrap_or(-1);
            let parent = topology.parent[hub][k]
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  hub {:>4}: level {}, parent {}, gc_delay {}",
                hub, level, parent, plan.delay[hub][k]
            );
        }
    }
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Diagnostics go to stderr; stdout carries only the measurement stream.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Run(config) => run_simulation(config),
        Commands::GenKeys(config) => gen_keys(config),
        Commands::Topology(config) => print_topology(config),
    };

    if let Err(err) = result {
        error!("fatal: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flag_defaults() {
        let cli = Cli::parse_from(["aggsim", "run"]);
        let Commands::Run(config) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(config.nracks, 1);
        assert_eq!(config.nodes_per_rack, 1);
        assert_eq!(config.fanout, 2);
        assert!(!config.multitree);
        assert_eq!(config.msg_rate, 4000);
        assert_eq!(config.msg_size, 32);
        assert_eq!(config.gc_policy, 0);
        assert_eq!(config.gc_period, 10);
        assert_eq!(config.gc_acc_delay, 100);
        assert_eq!(config.in_limit, 125_000_000);
        assert_eq!(config.out_limit, 125_000_000);
        assert_eq!(config.in_limit_root, None);
        assert_eq!(config.duration, 60);
        assert_eq!(config.ticks, 1000);
        assert_eq!(config.nthreads, 1);
    }

    #[test]
    fn test_unknown_gc_policy_is_rejected() {
        let cli = Cli::parse_from(["aggsim", "run", "--gc-policy", "7"]);
        let Commands::Run(config) = cli.command else {
            panic!("expected run command");
        };
        assert!(config.to_sim_config().is_err());
    }

    #[test]
    fn test_multitree_flag_carries_through() {
        let cli = Cli::parse_from(["aggsim", "run", "--multitree", "--fanout", "4"]);
        let Commands::Run(config) = cli.command else {
            panic!("expected run command");
        };
        let sim_config = config.to_sim_config().unwrap();
        assert_eq!(sim_config.tree_count(), 3);
    }
}
