use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

/// Sole owner of the output file handle.
///
/// Fetchers never touch the file directly; every chunk goes through
/// [`PositionedWriter::write_at`], which seeks and writes under one lock.
#[derive(Debug)]
pub struct PositionedWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl PositionedWriter {
    /// Create or truncate `path`, optionally sizing it to `preallocate` bytes.
    pub async fn create(path: &Path, preallocate: Option<u64>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        if let Some(len) = preallocate {
            file.set_len(len).await?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all of `data` starting at `offset`.
    ///
    /// The guard is dropped on every exit path, including a failed write.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        // Wait for tokio's background write so its error is reported here.
        file.flush().await
    }

    /// Flush buffered data and push it to disk.
    pub async fn finish(&self) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_data().await
    }
}
