//! Line sources at the bottom of the pipeline.

use crate::stream::GcodeStream;
use gcodestream_core::{thread_safe, GcodeError, PrinterMove, Result, ThreadSafe};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Lines held in memory
#[derive(Debug, Default)]
pub struct MemorySource {
    lines: VecDeque<String>,
}

impl MemorySource {
    /// Create a source from a list of lines
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a source from newline-separated text
    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines().map(str::trim))
    }

    /// Lines not yet read
    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl GcodeStream for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    fn set_printer_position(&mut self, _position: PrinterMove) {}

    fn cancel(&mut self) {
        self.lines.clear();
    }

    fn debug_info(&self) -> String {
        format!("memory ({} lines left)", self.lines.len())
    }
}

/// Where a [`FileSource`] records the error that ended it early
pub type ReadFailure = ThreadSafe<Option<GcodeError>>;

/// Lines read lazily from a G-code file
///
/// Bytes that are not valid UTF-8 (a degree sign in a Latin-1 comment, say)
/// are replaced rather than ending the stream. An I/O error ends the stream
/// and is kept in the source's [`ReadFailure`] slot. The file handle is
/// closed when the source is dropped.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    lines_read: u64,
    failure: ReadFailure,
}

impl FileSource {
    /// Open a G-code file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| GcodeError::FileError {
            reason: format!("{}: {}", path.display(), e),
        })?;

        tracing::debug!("Opened G-code source {}", path.display());
        Ok(Self {
            path,
            reader: Some(BufReader::with_capacity(READ_BUFFER_SIZE, file)),
            lines_read: 0,
            failure: thread_safe(None),
        })
    }

    /// Shared slot holding the error that stopped reading, if any
    pub fn failure(&self) -> ReadFailure {
        self.failure.clone()
    }

    /// Number of lines handed out so far
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GcodeStream for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn read_line(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        let mut buffer = Vec::new();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(_) => {
                self.lines_read += 1;
                let line = match String::from_utf8(buffer) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(
                            "Line {} of {} is not valid UTF-8, replacing invalid bytes",
                            self.lines_read,
                            self.path.display()
                        );
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                Some(line.trim().to_string())
            }
            Err(e) => {
                let error = GcodeError::ReadFailed {
                    path: self.path.display().to_string(),
                    line: self.lines_read,
                    reason: e.to_string(),
                };
                tracing::error!("{}", error);
                *self.failure.lock() = Some(error);
                self.reader = None;
                None
            }
        }
    }

    fn set_printer_position(&mut self, _position: PrinterMove) {}

    fn cancel(&mut self) {
        self.reader = None;
    }

    fn debug_info(&self) -> String {
        format!("file {} (line {})", self.path.display(), self.lines_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_source_from_text() {
        let mut source = MemorySource::from_text("G28\n  G1 X1  \nM105");
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.read_line().as_deref(), Some("G28"));
        assert_eq!(source.read_line().as_deref(), Some("G1 X1"));
        assert_eq!(source.read_line().as_deref(), Some("M105"));
        assert_eq!(source.read_line(), None);
    }

    #[test]
    fn test_file_source_reads_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "G28\r\nG1 X10\n\nM105").unwrap();

        let mut source = FileSource::open(file.path()).unwrap();
        let lines: Vec<String> = std::iter::from_fn(|| source.read_line()).collect();

        assert_eq!(lines, vec!["G28", "G1 X10", "", "M105"]);
        assert_eq!(source.lines_read(), 4);
    }

    #[test]
    fn test_file_source_replaces_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"G1 X1\n; temp 210\xB0C\nG1 X2\nG1 X3\n").unwrap();

        let mut source = FileSource::open(file.path()).unwrap();
        let lines: Vec<String> = std::iter::from_fn(|| source.read_line()).collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("; temp 210"));
        assert_eq!(&lines[2..], &["G1 X2", "G1 X3"]);
        assert!(source.failure().lock().is_none());
    }

    #[test]
    fn test_file_source_keeps_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileSource::open(dir.path()).unwrap();

        assert_eq!(source.read_line(), None);
        assert_eq!(source.read_line(), None);
        let failure = source.failure().lock().clone();
        assert!(matches!(failure, Some(GcodeError::ReadFailed { line: 0, .. })));
    }

    #[test]
    fn test_file_source_missing_file() {
        let err = FileSource::open("/definitely/not/here.gcode").unwrap_err();
        assert!(err.to_string().contains("File error"));
    }
}
