//! SQL command implementation.

use super::Target;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sealdb_core::{QueryResult, Value};
use serde_json::{Map, Value as Json};

/// Runs the sql command.
///
/// The statement runs in its own session; closing it seals any change.
pub fn run(
    target: &Target,
    password: &str,
    statement: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !target.has_sealed_content() {
        return Err(format!("No database found at {:?}", target.path).into());
    }

    let db = target.open(password, |_| Ok(()))?;
    let result = db.execute(statement, &[])?;
    db.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&to_json(&result))?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &QueryResult) {
    if result.columns.is_empty() {
        println!("{} row(s) changed", result.changes);
        return;
    }

    println!("{}", result.columns.join("\t"));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(render).collect();
        println!("{}", cells.join("\t"));
    }
    println!("({} row(s))", result.rows.len());
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("x'{}'", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
    }
}

/// Converts rows to JSON objects keyed by column name. Blobs are base64.
fn to_json(result: &QueryResult) -> Json {
    if result.columns.is_empty() {
        return serde_json::json!({ "changes": result.changes });
    }

    let rows = result
        .rows
        .iter()
        .map(|row| {
            let object: Map<String, Json> = result
                .columns
                .iter()
                .cloned()
                .zip(row.iter().map(value_to_json))
                .collect();
            Json::Object(object)
        })
        .collect();
    Json::Array(rows)
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(i) => Json::from(*i),
        Value::Real(f) => Json::from(*f),
        Value::Text(s) => Json::from(s.as_str()),
        Value::Blob(b) => Json::from(STANDARD.encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{target, PASSWORD};
    use tempfile::tempdir;

    #[test]
    fn statement_is_sealed_on_exit() {
        let dir = tempdir().unwrap();
        let target = target(&dir);
        crate::commands::init::run(&target, PASSWORD, None).unwrap();

        run(&target, PASSWORD, "CREATE TABLE t (x INTEGER)", "text").unwrap();
        run(&target, PASSWORD, "INSERT INTO t VALUES (7)", "json").unwrap();

        let db = target.open(PASSWORD, |_| Ok(())).unwrap();
        let result = db.execute("SELECT x FROM t", &[]).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Integer(7)]]);
    }

    #[test]
    fn json_rows_are_keyed_by_column() {
        let result = QueryResult {
            columns: vec!["id".into(), "name".into(), "data".into()],
            rows: vec![vec![
                Value::Integer(1),
                Value::Text("bolt".into()),
                Value::Blob(vec![0xde, 0xad]),
            ]],
            changes: 0,
        };

        let json = to_json(&result);
        assert_eq!(json[0]["id"], 1);
        assert_eq!(json[0]["name"], "bolt");
        assert_eq!(json[0]["data"], "3q0=");
    }

    #[test]
    fn blobs_render_as_hex_literals() {
        assert_eq!(render(&Value::Blob(vec![0x0a, 0xff])), "x'0aff'");
        assert_eq!(render(&Value::Null), "NULL");
    }
}
