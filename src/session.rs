use std::fs::{self, File};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::TempDir;

use crate::error::{LoadError, PageError};

pub const DEFAULT_ISSUE: &str = "1";
pub const ARCHIVE_EXTENSION: &str = "tar.gz";
pub const PAGE_EXTENSION: &str = ".txt";

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]+").expect("valid regex"));

/// Strips everything but ASCII digits. Returns `None` when nothing is left,
/// so an empty prompt never turns into a reload.
pub fn sanitize_issue_id(input: &str) -> Option<String> {
    let digits = NON_DIGITS.replace_all(input, "");
    if digits.is_empty() {
        None
    } else {
        Some(digits.into_owned())
    }
}

pub fn issue_url(base_url: &str, issue_id: &str) -> String {
    format!(
        "{}/phrack{}.{}",
        base_url.trim_end_matches('/'),
        issue_id,
        ARCHIVE_EXTENSION
    )
}

/// The currently loaded issue and the scratch storage backing it.
///
/// A session is reset wholesale on every load; the previous scratch
/// directory is released first. Dropping a session releases it too.
#[derive(Debug, Default)]
pub struct Session {
    issue_id: String,
    source_url: String,
    scratch: Option<TempDir>,
    archive_path: PathBuf,
    archive: Option<File>,
    page_count: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, issue_id: &str, base_url: &str) -> Result<(), LoadError> {
        self.release();

        let prefix = format!("issue-{issue_id}-");
        let scratch = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir()
            .map_err(|source| LoadError::Storage {
                path: std::env::temp_dir().join(&prefix),
                source,
            })?;
        let archive_path = scratch
            .path()
            .join(format!("{issue_id}.{ARCHIVE_EXTENSION}"));
        let archive = File::create(&archive_path).map_err(|source| LoadError::Storage {
            path: archive_path.clone(),
            source,
        })?;

        self.issue_id = issue_id.to_string();
        self.source_url = issue_url(base_url, issue_id);
        self.scratch = Some(scratch);
        self.archive_path = archive_path;
        self.archive = Some(archive);
        self.page_count = 0;

        tracing::info!(
            issue = %self.issue_id,
            url = %self.source_url,
            scratch = %self.archive_path.display(),
            "session reset"
        );
        Ok(())
    }

    /// Closes the archive handle and removes the scratch directory. Safe to
    /// call any number of times, including before the first `reset`.
    pub fn release(&mut self) {
        // The handle must be closed before its directory goes away.
        self.archive = None;
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove scratch dir");
            } else {
                tracing::debug!(path = %path.display(), "released scratch dir");
            }
        }
        self.page_count = 0;
    }

    pub fn is_initialized(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn issue_id(&self) -> &str {
        &self.issue_id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub(crate) fn set_page_count(&mut self, count: usize) {
        self.page_count = count;
    }

    pub(crate) fn archive_mut(&mut self) -> Option<&mut File> {
        self.archive.as_mut()
    }

    pub(crate) fn close_archive(&mut self) {
        self.archive = None;
    }

    pub fn page_path(&self, page: &str) -> Option<PathBuf> {
        let dir = self.scratch_dir()?;
        Some(dir.join(format!("{page}{PAGE_EXTENSION}")))
    }

    pub fn read_page(&self, page: &str) -> Result<String, PageError> {
        if page.is_empty() || !page.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PageError::NotFound {
                page: page.to_string(),
            });
        }
        let path = self.page_path(page).ok_or(PageError::NoIssue)?;
        let bytes = fs::read(&path).map_err(|_| PageError::NotFound {
            page: page.to_string(),
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://www.phrack.org/archives/tgz";

    #[test]
    fn reset_builds_locator_from_template() {
        for id in ["1", "20", "70"] {
            let mut session = Session::new();
            session.reset(id, BASE).unwrap();
            assert_eq!(session.issue_id(), id);
            assert_eq!(
                session.source_url(),
                format!("http://www.phrack.org/archives/tgz/phrack{id}.tar.gz")
            );
        }
    }

    #[test]
    fn reset_allocates_fresh_scratch_dir() {
        let mut session = Session::new();
        session.reset("20", BASE).unwrap();
        let dir = session.scratch_dir().unwrap().to_path_buf();
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("issue-20-"), "unexpected dir name {name}");

        let entries: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("20.tar.gz")]);
        assert_eq!(fs::metadata(session.archive_path()).unwrap().len(), 0);
        assert_eq!(session.page_count(), 0);
    }

    #[test]
    fn reset_releases_previous_scratch_dir() {
        let mut session = Session::new();
        session.reset("1", BASE).unwrap();
        let first = session.scratch_dir().unwrap().to_path_buf();
        session.reset("2", BASE).unwrap();
        assert!(!first.exists());
        assert!(session.scratch_dir().unwrap().exists());
    }

    #[test]
    fn release_is_idempotent() {
        let mut session = Session::new();
        session.release();
        session.release();
        assert!(!session.is_initialized());

        session.reset("3", BASE).unwrap();
        let dir = session.scratch_dir().unwrap().to_path_buf();
        session.release();
        session.release();
        assert!(!dir.exists());
        assert!(!session.is_initialized());
    }

    #[test]
    fn drop_removes_scratch_dir() {
        let dir = {
            let mut session = Session::new();
            session.reset("4", BASE).unwrap();
            session.scratch_dir().unwrap().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn read_page_reports_missing_file() {
        let mut session = Session::new();
        assert!(matches!(session.read_page("1"), Err(PageError::NoIssue)));

        session.reset("5", BASE).unwrap();
        fs::write(session.page_path("1").unwrap(), "hello").unwrap();
        assert_eq!(session.read_page("1").unwrap(), "hello");
        assert!(matches!(
            session.read_page("9"),
            Err(PageError::NotFound { .. })
        ));
        assert!(matches!(
            session.read_page("../etc/passwd"),
            Err(PageError::NotFound { .. })
        ));
    }

    #[test]
    fn sanitize_strips_non_digits() {
        assert_eq!(sanitize_issue_id("2a0").as_deref(), Some("20"));
        assert_eq!(sanitize_issue_id(" 6 9\n").as_deref(), Some("69"));
        assert_eq!(sanitize_issue_id("abc"), None);
        assert_eq!(sanitize_issue_id(""), None);
    }

    #[test]
    fn issue_url_trims_trailing_slash() {
        assert_eq!(
            issue_url("http://host/tgz/", "7"),
            "http://host/tgz/phrack7.tar.gz"
        );
    }
}
