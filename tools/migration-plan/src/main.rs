use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::LevelFilter;

use vm_migration::core::config::MigrationConfig;
use vm_migration::core::migration_policy::MigrationPolicyKind;
use vm_migration::core::planner::{find_destination_single_run, plan_migrations};
use vm_migration::extensions::cluster_description::ClusterDescription;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Plans VM migrations for a cluster described in YAML file
struct Args {
    /// Path to YAML file with cluster description
    #[arg(long)]
    cluster: PathBuf,

    /// Path to YAML file with migration config (default values are used if absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print planning trace
    #[arg(long, short)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plans migrations over all nodes and prints them as JSON lines
    Plan {
        /// Migration policy (Consolidation, Overcommit or ConsolidationOvercommit), taken from config if absent
        #[arg(long)]
        policy: Option<String>,

        /// Ignore migration throttle
        #[arg(long)]
        manual: bool,
    },
    /// Finds destination for a single VM
    Find {
        #[arg(long)]
        vm: String,
    },
}

fn init_logger(level: LevelFilter) {
    Builder::new()
        .filter(Some("vm_migration"), level)
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

fn path_str(path: &Path) -> Result<&str, Box<dyn Error>> {
    path.to_str()
        .ok_or_else(|| format!("invalid path {}", path.display()).into())
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => MigrationConfig::from_file(path_str(path)?)?,
        None => MigrationConfig::default(),
    };
    let cluster = ClusterDescription::from_file(path_str(&args.cluster)?, config.clone())?;

    match args.command {
        Command::Plan { policy, manual } => {
            let kind = match policy {
                Some(policy) => policy.parse::<MigrationPolicyKind>()?,
                None => config.policy,
            };
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for decision in plan_migrations(kind, manual, &cluster, &config)? {
                writeln!(out, "{}", serde_json::to_string(&decision)?)?;
            }
        }
        Command::Find { vm } => match find_destination_single_run(&vm, &cluster) {
            Ok(node) => println!("{}", node),
            Err(e) => println!("{}", e),
        },
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if args.debug {
        init_logger(LevelFilter::Debug);
    } else {
        init_logger(LevelFilter::Warn);
    }

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
