mod common;
mod overlay;
mod ui;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::overlay::commands::{OverlayCommands, Outcome, RunOptions, handle_overlay_command};
use crate::overlay::config::ConfigOverrides;
use crate::overlay::error::OverlayError;
use crate::ui::prelude::*;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputArg {
    Text,
    Json,
}

/// Manage third-party overlay repositories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    output: OutputArg,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Additional catalog location (may be repeated)
    #[arg(short = 'o', long = "overlays", global = true)]
    overlays: Vec<String>,

    /// Accept incomplete catalog entries and unsupported types
    #[arg(long, global = true, conflicts_with = "strict")]
    nocheck: bool,

    /// Validate catalog entries even if the config disables it
    #[arg(long, global = true)]
    strict: bool,

    /// Use cached catalogs without downloading
    #[arg(short = 'N', long, global = true)]
    nofetch: bool,

    #[command(subcommand)]
    command: OverlayCommands,
}

fn main() {
    let cli = Cli::parse();

    let format = match cli.output {
        OutputArg::Text => OutputFormat::Text,
        OutputArg::Json => OutputFormat::Json,
    };
    ui::init(format, !cli.no_color);
    ui::set_debug_mode(cli.debug);

    let nocheck = if cli.nocheck {
        Some(true)
    } else if cli.strict {
        Some(false)
    } else {
        None
    };
    let options = RunOptions {
        config_path: cli.config,
        overrides: ConfigOverrides {
            extra_overlays: cli.overlays,
            nocheck,
            quiet: cli.quiet.then_some(true),
        },
        nofetch: cli.nofetch,
    };

    let code = match handle_overlay_command(&cli.command, &options) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            emit(Level::Error, "overlayman.error", &format!("{e:#}"), None);
            let interrupted = e
                .chain()
                .any(|cause| cause.downcast_ref::<OverlayError>().is_some_and(OverlayError::is_interrupt));
            if interrupted {
                Outcome::Interrupted.exit_code()
            } else {
                Outcome::Failure.exit_code()
            }
        }
    };
    std::process::exit(code);
}
