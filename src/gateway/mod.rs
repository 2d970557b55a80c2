//! Storage access
//!
//! Everything that touches the file system goes through [`FileGateway`], so the
//! repository can be pointed at a fake in tests and wrapped by the
//! [`circuit_breaker::CircuitBreakerGateway`] in production.

pub mod circuit_breaker;

use crate::error::{FileSystemError, GatewayError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerGateway, CircuitState, CircuitStats};

#[async_trait]
pub trait FileGateway: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool, GatewayError>;

    /// Entry names (not full paths) in the directory, sorted
    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, GatewayError>;

    async fn read_file(&self, path: &Path) -> Result<String, GatewayError>;

    /// First line without its terminator, `None` for an empty file
    async fn read_first_line(&self, path: &Path) -> Result<Option<String>, GatewayError>;

    async fn file_size(&self, path: &Path) -> Result<u64, GatewayError>;
}

#[async_trait]
impl<G: FileGateway + ?Sized> FileGateway for Arc<G> {
    async fn exists(&self, path: &Path) -> Result<bool, GatewayError> {
        (**self).exists(path).await
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, GatewayError> {
        (**self).list_directory(path).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, GatewayError> {
        (**self).read_file(path).await
    }

    async fn read_first_line(&self, path: &Path) -> Result<Option<String>, GatewayError> {
        (**self).read_first_line(path).await
    }

    async fn file_size(&self, path: &Path) -> Result<u64, GatewayError> {
        (**self).file_size(path).await
    }
}

/// [`FileGateway`] over the local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileGateway;

impl LocalFileGateway {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, err: std::io::Error) -> GatewayError {
    GatewayError::FileSystem(FileSystemError::from_io(path, err))
}

#[async_trait]
impl FileGateway for LocalFileGateway {
    async fn exists(&self, path: &Path) -> Result<bool, GatewayError> {
        tokio::fs::try_exists(path).await.map_err(|e| io_error(path, e))
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<String>, GatewayError> {
        let mut dir = tokio::fs::read_dir(path).await.map_err(|e| io_error(path, e))?;
        let mut names = Vec::new();

        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(path, e))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        names.sort();
        Ok(names)
    }

    // Files are appended to while we read, so a trailing partial UTF-8 sequence is
    // replaced rather than failing the whole file
    async fn read_file(&self, path: &Path) -> Result<String, GatewayError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn read_first_line(&self, path: &Path) -> Result<Option<String>, GatewayError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| io_error(path, e))?;
        let mut reader = tokio::io::BufReader::new(file);
        let mut buf = Vec::new();

        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| io_error(path, e))?;
        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    async fn file_size(&self, path: &Path) -> Result<u64, GatewayError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| io_error(path, e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_gateway_reads() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jsonl");
        std::fs::write(&file, "first\r\nsecond\n").unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "").unwrap();

        let gateway = LocalFileGateway::new();
        assert!(gateway.exists(&file).await.unwrap());
        assert!(!gateway.exists(&dir.path().join("missing")).await.unwrap());
        assert_eq!(
            gateway.list_directory(dir.path()).await.unwrap(),
            vec!["a.jsonl".to_string(), "b.jsonl".to_string()]
        );
        assert_eq!(gateway.read_first_line(&file).await.unwrap().as_deref(), Some("first"));
        assert_eq!(gateway.read_first_line(&dir.path().join("b.jsonl")).await.unwrap(), None);
        assert_eq!(gateway.file_size(&file).await.unwrap(), 14);
        assert!(gateway.read_file(&file).await.unwrap().contains("second"));
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let dir = TempDir::new().unwrap();
        let err = LocalFileGateway::new()
            .read_file(&dir.path().join("nope.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::FileSystem(FileSystemError::NotFound { .. })));
    }
}
