use std::fs::File;
use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Marker in the `value` column that injects a transport error.
pub const ERROR_MARKER: &str = "!error";

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("cannot open script: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed script row: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: `{raw}` is not JSON: {source}")]
    Value {
        row: usize,
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ScriptRow {
    at_ms: u64,
    path: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Injection {
    /// A value notification; `None` is an absent value.
    Value(Option<Value>),
    TransportError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub at: Duration,
    pub path: String,
    pub injection: Injection,
}

pub fn load_script(filename: &str) -> Result<Vec<ScriptStep>, ScriptError> {
    parse_script(File::open(filename)?)
}

/// Parses `at_ms,path,value` rows, ordered by time. Rows sharing a time
/// keep their file order.
pub fn parse_script<R: Read>(reader: R) -> Result<Vec<ScriptStep>, ScriptError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut steps = Vec::new();

    for (index, row) in rdr.deserialize::<ScriptRow>().enumerate() {
        let row = row?;
        let injection = if row.value == ERROR_MARKER {
            Injection::TransportError
        } else {
            match serde_json::from_str::<Value>(&row.value) {
                Ok(Value::Null) => Injection::Value(None),
                Ok(value) => Injection::Value(Some(value)),
                Err(source) => {
                    return Err(ScriptError::Value {
                        row: index + 1,
                        raw: row.value,
                        source,
                    })
                }
            }
        };
        steps.push(ScriptStep {
            at: Duration::from_millis(row.at_ms),
            path: row.path,
            injection,
        });
    }

    steps.sort_by_key(|step| step.at);
    Ok(steps)
}
