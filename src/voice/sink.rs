//! Non-speaker audio sinks

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::service::{AudioSink, ServiceError, ServiceResult};

/// Writes each response to `response_<unix-ts>.<ext>` in a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    last_path: Option<PathBuf>,
}

impl FileSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_path: None,
        }
    }

    /// Path of the most recently written file
    #[must_use]
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    fn next_path(&self, audio: &[u8]) -> PathBuf {
        let ext = if audio.starts_with(b"RIFF") { "wav" } else { "mp3" };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut path = self.dir.join(format!("response_{}.{ext}", now.as_secs()));
        // Several replies can land within the same second
        let mut n = 1;
        while path.exists() {
            path = self
                .dir
                .join(format!("response_{}_{n}.{ext}", now.as_secs()));
            n += 1;
        }
        path
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&mut self, audio: &[u8]) -> ServiceResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ServiceError::Fatal(format!("cannot create {}: {e}", self.dir.display())))?;

        let path = self.next_path(audio);
        tokio::fs::write(&path, audio)
            .await
            .map_err(|e| ServiceError::Fatal(format!("cannot write {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), bytes = audio.len(), "response audio saved");
        self.last_path = Some(path);
        Ok(())
    }
}

/// Discards audio
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&mut self, audio: &[u8]) -> ServiceResult<()> {
        tracing::trace!(bytes = audio.len(), "discarding response audio");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path());

        sink.play(b"ID3 first").await.unwrap();
        let first = sink.last_path().unwrap().to_path_buf();
        sink.play(b"RIFF second").await.unwrap();
        let second = sink.last_path().unwrap().to_path_buf();

        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "mp3");
        assert_eq!(second.extension().unwrap(), "wav");
        assert_eq!(std::fs::read(&first).unwrap(), b"ID3 first");
    }
}
