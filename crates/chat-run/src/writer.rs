//! JSON-lines snapshot writer
//!
//! One serialized [`TickRecord`] per line.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chat_ecs::{ReportError, SnapshotWriter, TickRecord};

/// Writes tick records as newline-delimited JSON.
pub struct JsonLinesWriter<W: Write + Send> {
    out: W,
    records: u64,
    is_closed: bool,
}

impl JsonLinesWriter<BufWriter<File>> {
    /// Create (or truncate) `path`, creating parent directories as needed.
    pub fn create(path: &Path) -> Result<Self, ReportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            records: 0,
            is_closed: false,
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn check_not_closed(&self) -> Result<(), ReportError> {
        if self.is_closed {
            Err(ReportError::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

impl<W: Write + Send> SnapshotWriter for JsonLinesWriter<W> {
    fn write(&mut self, record: &TickRecord) -> Result<(), ReportError> {
        self.check_not_closed()?;
        serde_json::to_writer(&mut self.out, record)
            .map_err(|e| ReportError::Serialization(e.to_string()))?;
        self.out.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ReportError> {
        self.check_not_closed()?;
        self.out.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ReportError> {
        self.check_not_closed()?;
        self.out.flush()?;
        self.is_closed = true;
        Ok(())
    }
}
