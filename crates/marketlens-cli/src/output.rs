use std::io::{self, Write};

use serde::Serialize;

use crate::error::CliError;

/// Writes one JSON document to stdout.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    write_line(&payload)
}

/// Writes one compact NDJSON line and flushes, so consumers see each pass immediately.
pub fn render_line<T: Serialize>(value: &T) -> Result<(), CliError> {
    write_line(&serde_json::to_string(value)?)
}

fn write_line(payload: &str) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{payload}")?;
    handle.flush()?;
    Ok(())
}
