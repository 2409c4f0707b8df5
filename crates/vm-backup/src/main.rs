//! # vm-backup
//!

use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use mimalloc::MiMalloc;
use tracing::{debug, error, info, warn};
use vm_backup::{
    BackupError, BackupRequest, CancelFlag, ProgressEvent, ProgressPhase, Reporter,
    catalog::{ConfigCatalog, NameKind, Workload},
    cluster::NoClusterVolumes,
    config::Config,
    logger::init_logger,
    provider::ConfigProvider,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "vm-backup", about = "Crash-consistent VM snapshot backup")]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config.toml and exit.
    Init,

    /// Run a backup.
    Run(RunArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// Workload names to back up; empty backs up every catalog workload.
    names: Vec<String>,

    /// Match names against stable identifiers instead of display names.
    #[arg(long)]
    by_id: bool,

    /// Override the configured output directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the configured archive name template.
    #[arg(long)]
    template: Option<String>,

    /// Snapshot every workload through one shared set.
    #[arg(long)]
    single_snapshot: bool,

    /// Override the configured compression level (0-9).
    #[arg(long)]
    compression: Option<i64>,
}

fn main() -> ExitCode {
    let _logger = match init_logger() {
        Ok(guards) => guards,
        Err(error) => {
            eprintln!("Could not initialise logging: {error}");
            return ExitCode::from(2);
        }
    };

    let cli = Cli::parse();

    let args = match cli.command {
        // Initialize config if invoked with 'init'.
        Some(Command::Init) => return init_config(&cli.config),
        Some(Command::Run(args)) => args,
        None => RunArgs::default(),
    };

    let config = match Config::load_toml(cli.config.clone()) {
        Ok(config) => config,
        Err(error) => {
            error!("Could not load config {:?}: {error}", cli.config);
            return ExitCode::from(2);
        }
    };

    let request = BackupRequest {
        workload_names: args.names,
        name_kind: if args.by_id {
            NameKind::Id
        } else {
            NameKind::DisplayName
        },
        output_dir: args.output_dir.unwrap_or_else(|| config.output_dir.clone()),
        name_template: args
            .template
            .unwrap_or_else(|| config.name_template.clone()),
        single_snapshot: args.single_snapshot || config.single_snapshot,
        compression_level: args.compression.unwrap_or(config.compression_level),
    };

    let mut provider = ConfigProvider::new(&config.workloads);
    let catalog = ConfigCatalog::new(
        config
            .workloads
            .iter()
            .map(|workload| Workload {
                id: workload.id.clone(),
                name: workload.name.clone(),
            })
            .collect(),
    );

    let cancel = CancelFlag::new();
    install_termination_handler(&cancel);

    let mut on_progress = |event: &mut ProgressEvent| log_progress(event);
    let mut reporter = Reporter::new(&mut on_progress, cancel.clone());

    match vm_backup::run(
        &mut provider,
        &catalog,
        &NoClusterVolumes,
        &request,
        &mut reporter,
    ) {
        Ok(resolved) => {
            info!("Backed up {} workload(s)", resolved.len());
            ExitCode::SUCCESS
        }
        Err(BackupError::Cancelled) => {
            warn!("Backup cancelled");
            ExitCode::from(3)
        }
        Err(error) => {
            error!("Backup failed: {error}");
            ExitCode::from(2)
        }
    }
}

/// Request cancellation on a termination signal. The run stops at the next
/// checkpoint and the snapshot set is torn down before exit.
fn install_termination_handler(cancel: &CancelFlag) {
    let cancel = cancel.clone();
    if let Err(error) = ctrlc::set_handler(move || {
        warn!("Termination signal received, cancelling");
        cancel.set();
    }) {
        warn!("Could not install the termination handler: {error}");
    }
}

fn init_config(path: &PathBuf) -> ExitCode {
    let contents = match toml::to_string_pretty(&Config::default()) {
        Ok(contents) => contents,
        Err(error) => {
            error!("Could not serialize config file: {error}");
            return ExitCode::from(2);
        }
    };

    if let Err(error) = fs::write(path, contents) {
        error!("Could not create config file: {error}");
        return ExitCode::from(2);
    }

    info!("Wrote default config to {path:?}");
    ExitCode::SUCCESS
}

fn log_progress(event: &mut ProgressEvent) {
    match &event.phase {
        ProgressPhase::Initializing => info!("Resolving workloads"),
        ProgressPhase::SnapshotStarting { components } => {
            info!("Creating snapshot set for: {}", components.join(", "));
        }
        ProgressPhase::SnapshotDone { mount_paths } => {
            info!("Snapshot set created over: {}", mount_paths.join(", "));
        }
        ProgressPhase::ArchiveStarting { archive } => info!("Writing archive {archive}"),
        ProgressPhase::EntryStarting { entry } => debug!("Archiving {entry}"),
        ProgressPhase::EntryProgress {
            entry,
            bytes,
            total_bytes,
        } => debug!("{entry}: {bytes}/{total_bytes} bytes"),
        ProgressPhase::ArchiveDone { archive } => info!("Finished archive {archive}"),
        ProgressPhase::SnapshotDeleting => info!("Deleting snapshot set"),
    }
}
