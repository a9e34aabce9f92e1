use log::info;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::SweepError;

/// Streams entries to a JSONL file while a run is in progress.
///
/// A transient write failure keeps the entries buffered for the next flush;
/// only `max_flush_failures` failures in a row are reported as an error.
#[derive(Debug)]
pub struct Logger<T>
where
    T: Serialize + Clone + DeserializeOwned,
{
    buffer: Vec<T>,
    buffer_size: usize,
    file_path: PathBuf,
    written: usize,
    flush_failures: usize,
    max_flush_failures: usize,
}

impl<T> Logger<T>
where
    T: Serialize + Clone + DeserializeOwned,
{
    pub fn new<P: AsRef<Path>>(file_path: P, buffer_size: usize) -> Self {
        let mut path = file_path.as_ref().to_path_buf();
        if path.extension() != Some(std::ffi::OsStr::new("jsonl")) {
            path.set_extension("jsonl");
        }

        Self {
            buffer: Vec::with_capacity(buffer_size.max(1)),
            buffer_size: buffer_size.max(1),
            file_path: path,
            written: 0,
            flush_failures: 0,
            max_flush_failures: 10,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn add(&mut self, data: T) -> Result<(), SweepError> {
        self.buffer.push(data);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SweepError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.append_buffer() {
            Ok(()) => {
                self.flush_failures = 0;
                self.written += self.buffer.len();
                self.buffer.clear();
                log::debug!("Run log flushed to {:?}", self.file_path);
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                log::error!(
                    "Flush failure {}/{}: {}",
                    self.flush_failures,
                    self.max_flush_failures,
                    e
                );

                if self.flush_failures % 3 == 0 {
                    log::warn!(
                        "Experiencing intermittent flush failures ({}/{})",
                        self.flush_failures,
                        self.max_flush_failures
                    );
                }

                if self.flush_failures >= self.max_flush_failures {
                    return Err(SweepError::Io {
                        source: std::io::Error::other(e.to_string()),
                        context: format!(
                            "Too many consecutive flush failures ({}) for {:?}",
                            self.max_flush_failures, self.file_path
                        ),
                    });
                }

                Ok(())
            }
        }
    }

    fn append_buffer(&self) -> Result<(), SweepError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|source| SweepError::Io {
                source,
                context: format!("Failed to open log file {:?}", self.file_path),
            })?;

        let mut writer = std::io::BufWriter::new(file);
        for data in &self.buffer {
            let json_line = serde_json::to_string(data)?;
            writeln!(writer, "{}", json_line)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read back every entry streamed so far
    pub fn entries(&mut self) -> Result<Vec<T>, SweepError> {
        self.flush()?;
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.file_path).map_err(|source| SweepError::Io {
            source,
            context: format!("Could not read JSONL file at {:?}", self.file_path),
        })?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SweepError::from))
            .collect()
    }

    /// Write `summary` as pretty JSON to `json_path` and remove the stream
    pub fn finalize<S: Serialize>(&mut self, summary: &S, json_path: &Path) -> Result<(), SweepError> {
        let streamed = self.entries()?.len();

        let json_output = serde_json::to_string_pretty(summary)?;
        std::fs::write(json_path, json_output).map_err(|source| SweepError::Io {
            source,
            context: format!("Could not write JSON file at {:?}", json_path),
        })?;

        if self.file_path.exists() {
            std::fs::remove_file(&self.file_path).map_err(|source| SweepError::Io {
                source,
                context: format!("Could not remove JSONL file at {:?}", self.file_path),
            })?;
        }

        info!("Converted {} streamed entries into {:?}", streamed, json_path);
        Ok(())
    }

    /// Entries written to disk so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<T> Drop for Logger<T>
where
    T: Serialize + Clone + DeserializeOwned,
{
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
