//! Raw line recorder
//!
//! Appends every line delivered by the splitter to a log file, CR-LF
//! restored, for offline replay against the parser.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::protocol::ProtocolError;

/// Records the raw serial stream line by line.
pub struct RawRecorder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    lines: u64,
}

impl RawRecorder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            lines: 0,
        }
    }

    /// Open the file for appending and stamp a header line.
    pub fn start(&mut self) -> Result<(), ProtocolError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# recording started {}", Utc::now().to_rfc3339())?;
        self.writer = Some(writer);
        self.lines = 0;
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut w) = self.writer.take() {
            if let Err(e) = w.flush() {
                eprintln!("[WARN] recorder: flush failed: {}", e);
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    pub fn line_count(&self) -> u64 {
        self.lines
    }

    /// Append one raw line. Write failures are logged and recording stops;
    /// they never disturb the engine.
    pub fn record(&mut self, line: &[u8]) {
        if let Some(w) = self.writer.as_mut() {
            let outcome = w
                .write_all(line)
                .and_then(|_| w.write_all(b"\r\n"));
            match outcome {
                Ok(()) => self.lines += 1,
                Err(e) => {
                    eprintln!("[WARN] recorder: write failed, stopping: {}", e);
                    self.writer = None;
                }
            }
        }
    }
}
