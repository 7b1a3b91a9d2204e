use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use library_upgrader::{
    cli::commands::{resolve_checkpoint, Cli, Commands},
    config::Config,
    pipeline::{
        apply::ApplyUpgrade,
        materialize::{Materializer, MATERIALIZED_PREFIX},
        snapshot::{LibrarySnapshotLoader, SNAPSHOT_FILE_NAME},
        upgrade_check::{UpgradeCheck, ELIGIBLE_PREFIX},
        StageReport,
    },
    services::{library::CliLibrary, player::OsaScriptBridge},
    utils::{checkpoint::latest_checkpoint, reporting::Reporter},
    MetadataExtractor, Result, UpgraderError,
};

fn input_checkpoint(config: &Config, file: Option<PathBuf>, prefix: &str) -> Result<PathBuf> {
    match file {
        Some(file) => Ok(resolve_checkpoint(&config.data_dir, &file)),
        None => latest_checkpoint(&config.data_dir, prefix).ok_or_else(|| {
            UpgraderError::CheckpointMissing(config.data_dir.join(format!("{}_*.csv", prefix)))
        }),
    }
}

fn run(cli: Cli) -> Result<StageReport> {
    let config = Config::load(&cli.config)?;
    let extractor = MetadataExtractor::new();

    match cli.command {
        Commands::LoadLibrary => {
            println!("Loading latest library data...");
            let bridge = OsaScriptBridge::new();
            let loader = LibrarySnapshotLoader::new(
                &bridge,
                config.data_dir.join(SNAPSHOT_FILE_NAME),
                config.player.workers,
            );
            loader.run()
        }

        Commands::CheckUpgrade { file, skip_tag_comparison } => {
            let (name, library_config) = config.library(cli.database.as_deref())?;
            println!("Checking upgrades against the '{}' library...", name);
            let input = match file {
                Some(file) => resolve_checkpoint(&config.data_dir, &file),
                None => config.data_dir.join(SNAPSHOT_FILE_NAME),
            };

            let mut settings = config.upgrade.clone();
            if skip_tag_comparison {
                settings.compare_tags = false;
            }
            let library = CliLibrary::new(library_config.command.clone())?;
            UpgradeCheck::new(&library, &extractor, &settings, &config.data_dir).run(&input)
        }

        Commands::Materialize { file } => {
            let (name, library_config) = config.library(cli.database.as_deref())?;
            let input = input_checkpoint(&config, file, ELIGIBLE_PREFIX)?;
            println!("Materializing {} from the '{}' library...", input.display(), name);

            let library = CliLibrary::new(library_config.command.clone())?;
            Materializer::new(
                &library,
                &extractor,
                &extractor,
                library_config,
                &config.materialize,
                &config.data_dir,
            )
            .run(&input)
        }

        Commands::ApplyUpdates { file } => {
            let input = input_checkpoint(&config, file, MATERIALIZED_PREFIX)?;
            println!("Applying {}...", input.display());
            let bridge = OsaScriptBridge::new();
            ApplyUpgrade::new(&bridge, config.player.volume_name.clone(), &config.data_dir).run(&input)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(report) => {
            Reporter::new().print_stage_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
