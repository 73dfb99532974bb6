//! Init command implementation.

use super::Target;
use std::path::Path;

/// Runs the init command.
pub fn run(
    target: &Target,
    password: &str,
    schema: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if target.has_sealed_content() {
        return Err(format!("Database already exists at {:?}", target.path).into());
    }

    let schema = schema.map(std::fs::read_to_string).transpose()?;
    let db = target.open(password, |conn| {
        if let Some(sql) = &schema {
            conn.execute_batch(sql)?;
        }
        Ok(())
    })?;
    db.close()?;

    println!("Created encrypted database at {:?}", target.path);
    println!("Settings: {:?}", target.settings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{target, PASSWORD};
    use tempfile::tempdir;

    #[test]
    fn creates_database_with_schema() {
        let dir = tempdir().unwrap();
        let target = target(&dir);
        let schema = dir.path().join("schema.sql");
        std::fs::write(&schema, "CREATE TABLE items (name TEXT);").unwrap();

        run(&target, PASSWORD, Some(&schema)).unwrap();

        assert!(target.has_sealed_content());
        assert!(target.settings.exists());
        let db = target.open(PASSWORD, |_| Ok(())).unwrap();
        let result = db.execute("SELECT count(*) FROM items", &[]).unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn refuses_existing_database() {
        let dir = tempdir().unwrap();
        let target = target(&dir);
        run(&target, PASSWORD, None).unwrap();

        assert!(run(&target, PASSWORD, None).is_err());
    }
}
