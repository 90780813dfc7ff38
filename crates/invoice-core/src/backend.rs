//! Storage Backends
//!
//! The durable side of the invoice store. A backend holds one document
//! which is read wholesale at startup and rewritten wholesale on change.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Durable document storage (Strategy pattern)
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Read the whole document, `None` if it does not exist yet
    async fn read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replace the whole document
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Human-readable location for diagnostics
    fn location(&self) -> String;
}

/// JSON document on the local filesystem.
///
/// Writes land in a sibling temp file which is then renamed over the
/// target, so a crash mid-write never leaves a truncated store behind.
#[derive(Clone, Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "invoices.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StoreBackend for JsonFileBackend {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory document (for tests and ephemeral runs)
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing document
    pub fn with_document(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            document: Mutex::new(Some(bytes.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current durable document
    pub async fn document(&self) -> Option<Vec<u8>> {
        self.document.lock().await.clone()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.document.lock().await.clone())
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("memory backend configured to fail writes"));
        }
        *self.document.lock().await = Some(bytes.to_vec());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".into()
    }
}
