//! Piped standard input.
//!
//! When standard input is a pipe its lines replace the configured message
//! body. Lines are joined with `\n`; a trailing `\r` on each line is dropped.

use std::io::{self, BufRead};

/// Returns true if standard input is a pipe.
#[cfg(unix)]
pub fn stdin_is_piped() -> io::Result<bool> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = std::fs::metadata("/dev/stdin")?;
    Ok(metadata.file_type().is_fifo())
}

/// Returns true if standard input is not attached to a terminal.
#[cfg(not(unix))]
pub fn stdin_is_piped() -> io::Result<bool> {
    use std::io::IsTerminal;

    Ok(!io::stdin().is_terminal())
}

/// Reads every line from `reader` and joins them with `\n`.
pub fn read_lines<R: BufRead>(reader: R) -> io::Result<String> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        lines.push(match line.strip_suffix('\r') {
            Some(stripped) => stripped.to_string(),
            None => line,
        });
    }
    Ok(lines.join("\n"))
}

/// Reads the piped body, or returns `None` when standard input is not a pipe.
pub fn read_piped_body() -> io::Result<Option<String>> {
    if !stdin_is_piped()? {
        return Ok(None);
    }

    tracing::debug!("Pipe input detected, reading");
    let stdin = io::stdin();
    let body = read_lines(stdin.lock())?;
    Ok(Some(body))
}

/// Picks the body: non-empty piped input wins over the configured message.
pub fn select_body(piped: Option<String>, configured: &str) -> String {
    match piped {
        Some(body) if !body.is_empty() => body,
        _ => configured.to_string(),
    }
}
