//! SealDB CLI
//!
//! Command-line tools for SealDB encrypted databases.
//!
//! # Commands
//!
//! - `init` - Create a new encrypted database
//! - `sql` - Run one SQL statement
//! - `verify` - Check database integrity
//! - `inspect` - Show on-disk state and the pending recovery decision
//! - `rekey` - Change the password

mod commands;

use clap::{Parser, Subcommand};
use commands::Target;
use sealdb_core::{CoreError, OpenFailure};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// SealDB command-line database tools.
#[derive(Parser)]
#[command(name = "sealdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the encrypted database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Database password
    #[arg(global = true, long, env = "SEALDB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Settings file (defaults to <path>.settings.json)
    #[arg(global = true, long)]
    settings: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new encrypted database
    Init {
        /// SQL file applied to the new database
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Run one SQL statement and seal the result
    Sql {
        /// Statement to run
        statement: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check database integrity
    Verify,

    /// Show on-disk state without opening a session
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Change the database password
    Rekey {
        /// New password
        #[arg(long, env = "SEALDB_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_status(e.as_ref()))
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Version = cli.command {
        println!("SealDB CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("SealDB Core v{}", sealdb_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Database path required")?;
    let target = Target::new(path, cli.settings);
    let password = cli.password.as_deref();

    match cli.command {
        Commands::Init { schema } => {
            commands::init::run(&target, required(password)?, schema.as_deref())?;
        }
        Commands::Sql { statement, format } => {
            commands::sql::run(&target, required(password)?, &statement, &format)?;
        }
        Commands::Verify => {
            commands::verify::run(&target, required(password)?)?;
        }
        Commands::Inspect { format } => {
            commands::inspect::run(&target, password, &format)?;
        }
        Commands::Rekey { new_password } => {
            commands::rekey::run(&target, required(password)?, &new_password)?;
        }
        Commands::Version => {}
    }

    Ok(())
}

fn required(password: Option<&str>) -> Result<&str, Box<dyn std::error::Error>> {
    password.ok_or_else(|| "Password required (--password or SEALDB_PASSWORD)".into())
}

/// Distinguishes a retryable wrong password from hard failures.
fn exit_status(error: &(dyn std::error::Error + 'static)) -> u8 {
    match error.downcast_ref::<CoreError>().map(CoreError::open_failure) {
        Some(OpenFailure::WrongPassword) => 2,
        Some(OpenFailure::CorruptedFile) => 3,
        Some(OpenFailure::StorageUnavailable) => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_status_follows_open_failure() {
        let wrong: Box<dyn std::error::Error> = Box::new(CoreError::WrongPassword);
        assert_eq!(exit_status(wrong.as_ref()), 2);

        let corrupted: Box<dyn std::error::Error> = Box::new(CoreError::corrupted_file("x"));
        assert_eq!(exit_status(corrupted.as_ref()), 3);

        let other: Box<dyn std::error::Error> = "plain".into();
        assert_eq!(exit_status(other.as_ref()), 1);
    }
}
