//! Rekey command implementation.

use super::Target;

/// Runs the rekey command.
pub fn run(
    target: &Target,
    password: &str,
    new_password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !target.has_sealed_content() {
        return Err(format!("No database found at {:?}", target.path).into());
    }
    if new_password.is_empty() {
        return Err("New password must not be empty".into());
    }

    let db = target.open(password, |_| Ok(()))?;
    db.change_password(new_password)?;
    db.close()?;

    println!("Password changed for {:?}", target.path);
    Ok(())
}
