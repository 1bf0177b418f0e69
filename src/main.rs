use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::io;

use invctl::cli::{Cli, Command};
use invctl::{Context, commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Validate => commands::converge::validate(&ctx, &cli.config),
        Command::Plan { instance } => {
            commands::converge::plan(&ctx, &cli.config, instance.as_deref())
        }
        Command::Status => commands::converge::status(&ctx, &cli.config),
        Command::Apply(args) => commands::converge::apply(
            &ctx,
            &cli.config,
            args.dry_run,
            args.jobs as usize,
            args.yes,
            args.json,
        ),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "invctl", &mut io::stdout());
            Ok(())
        }
    }
}
