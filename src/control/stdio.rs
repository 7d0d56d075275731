//! Line-oriented stdio for the control plane.
//!
//! A peer announces itself with one JSON line on stdout; the creator reads
//! it back from the child's pipe.
//!
//! - **stdout**: control lines only, one JSON document per line
//! - **stderr**: logs
//! - **Never use `println!`**: it may add `\r\n` on Windows

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GroupwireError, Result};

/// Write `line` followed by a single `\n` and flush.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Write a line to stdout.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_line(&mut handle, line)
}

/// Write a value to stdout as a single JSON line.
pub fn write_stdout_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    write_stdout_line(&json)?;
    Ok(())
}

/// Read one line and parse it as JSON.
///
/// End of input before a line is a launch error.
pub fn read_json_line<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(GroupwireError::Launch(
            "peer closed stdout before announcing itself".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_line_uses_bare_newline() {
        let mut out = Vec::new();
        write_line(&mut out, r#"{"test":true}"#).unwrap();
        assert_eq!(out, b"{\"test\":true}\n");
    }

    #[test]
    fn test_read_json_line() {
        #[derive(serde::Deserialize)]
        struct Ready {
            value: i32,
        }

        let mut input = Cursor::new(b"{\"value\":42}\n{\"value\":7}\n".to_vec());
        let first: Ready = read_json_line(&mut input).unwrap();
        let second: Ready = read_json_line(&mut input).unwrap();
        assert_eq!((first.value, second.value), (42, 7));
    }

    #[test]
    fn test_read_json_line_eof() {
        let mut input = Cursor::new(Vec::new());
        let result: Result<serde_json::Value> = read_json_line(&mut input);
        assert!(matches!(result, Err(GroupwireError::Launch(_))));
    }

    #[test]
    fn test_write_stdout_json_serializes() {
        #[derive(Serialize)]
        struct TestData {
            value: i32,
        }
        assert!(write_stdout_json(&TestData { value: 42 }).is_ok());
    }
}
