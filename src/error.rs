use std::io;
use std::path::PathBuf;

/// Failures that end a load. Every variant is fatal for the session that
/// produced it; the pipeline releases the scratch directory before
/// reporting one.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("allocate scratch storage at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("write archive to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("extract {}: {message}", .path.display())]
    Extract { path: PathBuf, message: String },
    #[error("index pages in {}: {source}", .path.display())]
    Index {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session not initialized")]
    Uninitialized,
}

/// Recoverable page lookup failure, shown inline in the body pane.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("page {page} not found")]
    NotFound { page: String },
    #[error("no issue loaded")]
    NoIssue,
}
