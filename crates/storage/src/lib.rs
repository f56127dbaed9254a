use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use common::traits::{OutputStreamWriter, StreamWriteError};
use common::CaptureSettings;
use tracing::{debug, info, warn};

/// In-memory trace sink used for testing and tooling.
///
/// Clones share the same byte log, so a test can keep one handle and give
/// another to a writer.
#[derive(Clone, Default)]
pub struct InMemoryStreamWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl InMemoryStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputStreamWriter for InMemoryStreamWriter {
    fn output_stream_write(&self, data: &[u8]) -> Result<(), StreamWriteError> {
        let mut guard = self.inner.lock().map_err(|_| StreamWriteError::Poisoned)?;
        guard.extend_from_slice(data);
        Ok(())
    }
}

struct FileState {
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

/// Append-only trace file.
///
/// Every block goes through one lock acquisition, so blocks from different
/// workers never interleave.
pub struct FileStreamWriter {
    path: PathBuf,
    flush_after_write: bool,
    state: Mutex<FileState>,
}

impl FileStreamWriter {
    /// Creates (or truncates) the trace file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, flush_after_write: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;

        info!(path = %path.display(), flush_after_write, "Opened trace file");

        Ok(Self {
            path,
            flush_after_write,
            state: Mutex::new(FileState {
                writer: Some(BufWriter::new(file)),
                bytes_written: 0,
            }),
        })
    }

    pub fn from_settings(settings: &CaptureSettings) -> Result<Self> {
        Self::create(&settings.capture_file, settings.flush_after_write)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.state
            .lock()
            .map(|state| state.bytes_written)
            .unwrap_or_default()
    }

    pub fn flush(&self) -> Result<(), StreamWriteError> {
        let mut state = self.state.lock().map_err(|_| StreamWriteError::Poisoned)?;
        let writer = state.writer.as_mut().ok_or(StreamWriteError::Closed)?;
        writer.flush()?;
        Ok(())
    }

    /// Flushes and closes the file. Later writes fail with `Closed`.
    pub fn close(&self) -> Result<(), StreamWriteError> {
        let mut state = self.state.lock().map_err(|_| StreamWriteError::Poisoned)?;
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
            debug!(path = %self.path.display(), bytes = state.bytes_written, "Closed trace file");
        }
        Ok(())
    }
}

impl OutputStreamWriter for FileStreamWriter {
    fn output_stream_write(&self, data: &[u8]) -> Result<(), StreamWriteError> {
        let mut state = self.state.lock().map_err(|_| StreamWriteError::Poisoned)?;
        let writer = state.writer.as_mut().ok_or(StreamWriteError::Closed)?;
        let result = writer.write_all(data).and_then(|()| {
            if self.flush_after_write {
                writer.flush()
            } else {
                Ok(())
            }
        });

        if let Err(err) = result {
            // the block may be half written; nothing may follow it
            if let Some(writer) = state.writer.take() {
                let (_file, _unflushed) = writer.into_parts();
            }
            warn!(
                path = %self.path.display(),
                bytes = state.bytes_written,
                error = %err,
                "Trace file write failed; closing sink"
            );
            return Err(err.into());
        }
        state.bytes_written += data.len() as u64;
        Ok(())
    }
}

impl Drop for FileStreamWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(path = %self.path.display(), error = %err, "Trace file close failed on drop");
        }
    }
}
