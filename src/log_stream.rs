use std::{
    fs::File,
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{trace, warn};

use crate::errors::SamplerError;

// Return the log file path of the given device
pub fn log_path(base_name: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{base_name}_{index}.csv"))
}

// Output that can be cut back to an earlier length
trait Rewind: Write + Seek {
    fn rewind_to(&mut self, len: u64) -> io::Result<()>;
}

impl Rewind for File {
    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;

        Ok(())
    }
}

// Write the whole text or nothing. On failure the output is cut
// back to where it was, so a retried batch is never written twice
fn append_all<W: Rewind>(out: &mut W, text: &[u8]) -> io::Result<()> {
    let start = out.stream_position()?;

    if let Err(err) = out.write_all(text) {
        if let Err(rewind_err) = out.rewind_to(start) {
            warn!("Failed to roll back partial log write: {rewind_err}");
        }

        return Err(err);
    }

    Ok(())
}

// Append only CSV output of a single device
#[derive(Debug)]
pub struct LogStream {
    index: u32,
    path: PathBuf,

    // None once the stream has been closed.
    // Unbuffered, every append goes straight to the file
    file: Option<File>,
}

impl LogStream {
    // Create the log file, truncating any existing content
    pub fn create(index: u32, path: &Path) -> Result<Self, SamplerError> {
        let file = File::create(path).map_err(|source| {
            SamplerError::LogOpenFailure {
                path: path.to_path_buf(),
                source,
            }
        })?;

        trace!("Opened log {:?} for device {index}", path);

        Ok(Self {
            index,
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    // Append the text as a single write, either all of
    // it reaches the file or the file is left unchanged
    pub fn append(&mut self, text: &str) -> Result<(), SamplerError> {
        let index = self.index;
        let file = self
            .file
            .as_mut()
            .ok_or(SamplerError::InvalidState("log stream is closed"))?;

        append_all(file, text.as_bytes())
            .map_err(|source| SamplerError::LogWriteFailure { index, source })
    }

    // Sync and close the stream, closing twice is a no-op.
    // The file is closed even if the sync fails
    pub fn close(&mut self) -> Result<(), SamplerError> {
        let index = self.index;

        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|source| SamplerError::LogWriteFailure { index, source })?;

            trace!("Closed log {:?}", self.path);
        }

        Ok(())
    }
}
