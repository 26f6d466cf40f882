//! cibridge - mirror GitHub pull requests and branches to GitLab CI
//!
//! ## Commands
//!
//! - `mirror`: push a branch or pull request to a GitLab mirror branch
//! - `status`: relay a GitLab pipeline's status to the GitHub commit
//! - `event`: act on a GitHub or GitLab webhook payload
//!
//! ## Exit codes
//!
//! - `0`: done
//! - `1`: known bad outcome, reported as a commit status
//! - `2`: invalid arguments
//! - `3`: git, API, or environment failure
//! - `4`: unexpected failure

mod commands;
mod config;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, Level};

use cibridge_core::telemetry::init_tracing;
use cibridge_core::{BridgeError, ErrorClass};

use crate::commands::{Completion, EventArgs, MirrorArgs, StatusArgs};
use crate::config::BridgeConfig;

/// Exit code for errors that are not classified bridge errors.
const UNEXPECTED_EXIT: u8 = 4;

#[derive(Parser)]
#[command(name = "cibridge")]
#[command(author = "Stevedores Org")]
#[command(version = cibridge_core::VERSION)]
#[command(about = "Mirror GitHub pull requests to GitLab CI and relay pipeline status", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a branch or pull request to a GitLab branch
    Mirror(MirrorArgs),

    /// Report a GitLab pipeline status on the GitHub commit
    Status(StatusArgs),

    /// Decode a webhook payload and run the matching command
    Event(EventArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = BridgeConfig::from_env();
    let result = match &cli.command {
        Commands::Mirror(args) => commands::mirror(&config, args).await,
        Commands::Status(args) => commands::status(&config, args).await,
        Commands::Event(args) => commands::event(&config, args).await,
    };
    exit_code(result)
}

fn exit_code(result: anyhow::Result<Completion>) -> ExitCode {
    match result {
        Ok(Completion::Done) => ExitCode::SUCCESS,
        Ok(Completion::ReportedFailure) => class_exit(ErrorClass::Reportable),
        Err(err) => match err.downcast_ref::<BridgeError>() {
            Some(bridge) => {
                error!(error = %bridge, class = ?bridge.class(), "cibridge failed");
                class_exit(bridge.class())
            }
            None => {
                error!(error = %format!("{err:#}"), "Unexpected failure");
                ExitCode::from(UNEXPECTED_EXIT)
            }
        },
    }
}

fn class_exit(class: ErrorClass) -> ExitCode {
    ExitCode::from(u8::try_from(class.exit_code()).unwrap_or(UNEXPECTED_EXIT))
}
