use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use studysync::cli::args::{Cli, Commands, SyncCommands};
use studysync::cli::commands::{self, Context};
use studysync::config::{ColorSetting, Config};
use studysync::features::sync::EntityKind;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "studysync=debug",
        _ => "studysync=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Whether a command talks to the backend.
const fn needs_network(command: &Commands) -> bool {
    match command {
        Commands::Task(_) | Commands::Routine(_) | Commands::Course(_) | Commands::Teacher(_) => {
            true
        },
        Commands::Sync(args) => {
            matches!(args.command, SyncCommands::Run { .. } | SyncCommands::Watch { .. })
        },
        Commands::Completions { .. } => false,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load().context("failed to load configuration")?;
    match config.general.color {
        ColorSetting::Always => colored::control::set_override(true),
        ColorSetting::Never => colored::control::set_override(false),
        ColorSetting::Auto => {},
    }
    let format = cli.output.unwrap_or(config.general.default_output);

    if let Commands::Completions { shell } = &cli.command {
        print!("{}", commands::completions(shell)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let output = runtime.block_on(async {
        let ctx = Context::new(config, cli.user)?;
        if needs_network(&cli.command) {
            ctx.detect_connectivity(cli.offline).await;
        }

        match cli.command {
            Commands::Task(args) => commands::entity(&ctx, EntityKind::Task, args.command, format).await,
            Commands::Routine(args) => {
                commands::entity(&ctx, EntityKind::Routine, args.command, format).await
            },
            Commands::Course(args) => {
                commands::entity(&ctx, EntityKind::Course, args.command, format).await
            },
            Commands::Teacher(args) => {
                commands::entity(&ctx, EntityKind::Teacher, args.command, format).await
            },
            Commands::Sync(args) => commands::sync(&ctx, args.command, format, cli.offline).await,
            Commands::Completions { shell } => commands::completions(&shell),
        }
    })?;

    println!("{output}");
    Ok(())
}
