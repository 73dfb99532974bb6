//! Inspect command implementation.

use super::Target;
use sealdb_core::{InspectReport, RecoveryOutcome};
use serde::Serialize;

/// Serializable view of an [`InspectReport`].
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Settings file path.
    pub settings: String,
    /// Encrypted file size in bytes.
    pub sealed_bytes: Option<u64>,
    /// Whether the installation salt exists.
    pub has_salt: bool,
    /// Whether a password change was interrupted.
    pub rekey_pending: bool,
    /// Working copy left by the last session.
    pub recorded_working_copy: Option<String>,
    /// Write sequence of the last sealed snapshot.
    pub sealed_seq: u64,
    /// Recovery the next open would take (requires the password).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

impl InspectResult {
    fn new(target: &Target, report: &InspectReport) -> Self {
        Self {
            path: report.path.display().to_string(),
            settings: target.settings.display().to_string(),
            sealed_bytes: report.sealed_bytes,
            has_salt: report.has_salt,
            rekey_pending: report.rekey_pending,
            recorded_working_copy: report
                .recorded_working_copy
                .as_ref()
                .map(|p| p.display().to_string()),
            sealed_seq: report.sealed_seq,
            recovery: report.recovery.as_ref().map(describe),
        }
    }
}

fn describe(outcome: &RecoveryOutcome) -> String {
    match outcome {
        RecoveryOutcome::Clean => "none".to_string(),
        RecoveryOutcome::Promoted { write_seq, .. } => {
            format!("promote working copy (write sequence {write_seq})")
        }
        RecoveryOutcome::Discarded { reason, .. } => format!("discard working copy ({reason})"),
    }
}

/// Runs the inspect command.
pub fn run(
    target: &Target,
    password: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = sealdb_core::inspect(
        &target.path,
        password,
        target.open_settings()?,
        &target.config,
    )?;
    let result = InspectResult::new(target, &report);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!("Settings: {}", result.settings);
    match result.sealed_bytes {
        Some(bytes) => println!("Sealed size: {bytes} bytes"),
        None => println!("Sealed size: (no sealed content)"),
    }
    println!("Salt: {}", if result.has_salt { "present" } else { "missing" });
    if result.rekey_pending {
        println!("Password change: interrupted, completes on next open");
    }
    println!("Sealed sequence: {}", result.sealed_seq);
    match &result.recorded_working_copy {
        Some(path) => println!("Recorded working copy: {path}"),
        None => println!("Recorded working copy: none"),
    }
    match &result.recovery {
        Some(recovery) => println!("Recovery on next open: {recovery}"),
        None => println!("Recovery on next open: (password required)"),
    }
}
