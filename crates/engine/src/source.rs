use std::future::Future;
use std::io;
use std::path::Path;

use tokio::io::{AsyncBufRead, BufReader};

pub type ArtifactReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Where synthesizers read artifacts from.
pub trait ArtifactSource: Sync {
    /// Reads a small artifact (Playwright report, k6 summary) in one go.
    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;

    /// Opens a potentially large artifact for incremental reading.
    fn open_stream(&self, path: &Path) -> impl Future<Output = io::Result<ArtifactReader>> + Send;
}

/// Reads artifacts from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifacts;

impl ArtifactSource for FsArtifacts {
    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send {
        let path = path.to_path_buf();
        async move { tokio::fs::read_to_string(path).await }
    }

    fn open_stream(&self, path: &Path) -> impl Future<Output = io::Result<ArtifactReader>> + Send {
        let path = path.to_path_buf();
        async move {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(BufReader::with_capacity(64 * 1024, file)) as ArtifactReader)
        }
    }
}
