//! Verify command implementation.

use super::Target;
use sealdb_core::{sql, RecoveryOutcome};

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Problems reported by `PRAGMA integrity_check`.
    pub problems: Vec<String>,
    /// What open did about an orphaned working copy.
    pub recovery: RecoveryOutcome,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Runs the verify command.
pub fn run(target: &Target, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {:?}", target.path);
    println!();

    let result = check(target, password)?;

    match &result.recovery {
        RecoveryOutcome::Clean => {}
        RecoveryOutcome::Promoted { path, write_seq } => {
            println!("Recovered working copy {path:?} (write sequence {write_seq})");
        }
        RecoveryOutcome::Discarded { path, reason } => {
            println!("Discarded working copy {path:?}: {reason}");
        }
    }
    for problem in &result.problems {
        println!("  {problem}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err("Verification failed".into())
    }
}

/// Opens the database, checks it and closes it again.
pub fn check(target: &Target, password: &str) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !target.has_sealed_content() {
        return Err(format!("No database found at {:?}", target.path).into());
    }

    let db = target.open(password, |_| Ok(()))?;
    let problems = db.with_connection(sql::integrity_check)?;
    let recovery = db.recovery().clone();
    db.close()?;

    Ok(VerifyResult { problems, recovery })
}
