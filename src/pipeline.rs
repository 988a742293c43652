//! Background load of a single issue.
//!
//! A worker thread runs fetch → persist → unpack → index against a
//! [`Session`] it owns for the duration of the run, reporting progress on a
//! single-slot status channel. A supervisor thread drains that channel and
//! forwards each event to the UI, injecting a heartbeat whenever the worker
//! has been silent for a full interval. The UI gets the session back by
//! joining the [`PipelineHandle`].

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::archive;
use crate::error::LoadError;
use crate::session::Session;
use crate::source::ArchiveSource;

/// Messages from the worker to the supervisor.
#[derive(Debug)]
pub enum StatusEvent {
    Text(String),
    Indexed { page_count: usize },
    Done,
    Failed(LoadError),
}

/// Messages from the supervisor to the UI thread.
#[derive(Debug)]
pub enum UiEvent {
    Status(String),
    Heartbeat,
    Indexed { page_count: usize },
    Finished(Result<(), LoadError>),
}

enum Stop {
    Cancelled,
    Failed(LoadError),
}

impl From<LoadError> for Stop {
    fn from(err: LoadError) -> Self {
        Stop::Failed(err)
    }
}

pub struct PipelineHandle {
    issue_id: String,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<Session>>,
    supervisor: Option<JoinHandle<()>>,
}

/// Starts loading the issue `session` was reset for. Events are delivered
/// to `events` in emission order; the last one is always
/// [`UiEvent::Finished`] unless the receiver goes away first.
pub fn spawn(
    session: Session,
    source: Arc<dyn ArchiveSource>,
    events: Sender<UiEvent>,
    heartbeat: Duration,
) -> PipelineHandle {
    let issue_id = session.issue_id().to_string();
    let cancel = Arc::new(AtomicBool::new(false));
    let (status_tx, status_rx) = bounded(1);

    let worker_cancel = cancel.clone();
    let worker = thread::spawn(move || run_worker(session, source, status_tx, worker_cancel));
    let supervisor = thread::spawn(move || {
        supervise(status_rx, heartbeat, |event| events.send(event).is_ok());
    });

    PipelineHandle {
        issue_id,
        cancel,
        worker: Some(worker),
        supervisor: Some(supervisor),
    }
}

impl PipelineHandle {
    pub fn issue_id(&self) -> &str {
        &self.issue_id
    }

    /// Asks the worker to stop at the next stage boundary, or at the next
    /// chunk while the archive body is streaming.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn join(mut self) -> Result<Session> {
        self.join_threads()
    }

    fn join_threads(&mut self) -> Result<Session> {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor
                .join()
                .map_err(|_| anyhow!("status supervisor panicked"))?;
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("pipeline already joined"))?;
        worker.join().map_err(|_| anyhow!("load worker panicked"))
    }
}

/// Fails the read once `cancel` is set so a long body copy can be abandoned.
struct CancellableRead<'a, R> {
    inner: R,
    cancel: &'a AtomicBool,
}

impl<R: Read> Read for CancellableRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "load cancelled"));
        }
        self.inner.read(buf)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
            let _ = self.join_threads();
        }
    }
}

fn run_worker(
    mut session: Session,
    source: Arc<dyn ArchiveSource>,
    status: Sender<StatusEvent>,
    cancel: Arc<AtomicBool>,
) -> Session {
    let terminal = match run_stages(&mut session, source.as_ref(), &status, &cancel) {
        Ok(()) => {
            tracing::info!(issue = %session.issue_id(), pages = session.page_count(), "issue loaded");
            StatusEvent::Done
        }
        Err(Stop::Cancelled) => {
            tracing::info!(issue = %session.issue_id(), "load cancelled");
            StatusEvent::Done
        }
        Err(Stop::Failed(err)) => {
            tracing::error!(issue = %session.issue_id(), error = %err, "load failed");
            session.release();
            StatusEvent::Failed(err)
        }
    };
    let _ = status.send(terminal);
    session
}

fn run_stages(
    session: &mut Session,
    source: &dyn ArchiveSource,
    status: &Sender<StatusEvent>,
    cancel: &AtomicBool,
) -> Result<(), Stop> {
    let emit = |text: String| {
        status
            .send(StatusEvent::Text(text))
            .map_err(|_| Stop::Cancelled)
    };
    let checkpoint = || {
        if cancel.load(Ordering::SeqCst) {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    };

    // Fetching
    let url = session.source_url().to_string();
    emit(format!("Fetching {url}..."))?;
    tracing::info!(%url, "fetching issue");
    let body = source.open(&url).map_err(|err| LoadError::Fetch {
        url: url.clone(),
        message: format!("{err:#}"),
    })?;
    emit("\nDownload complete\n".to_string())?;
    checkpoint()?;

    // Persisting
    let archive_path = session.archive_path().to_path_buf();
    let file = session.archive_mut().ok_or(LoadError::Uninitialized)?;
    let mut reader = CancellableRead {
        inner: body,
        cancel,
    };
    let copied =
        io::copy(&mut reader, &mut *file).and_then(|written| file.flush().map(|()| written));
    drop(reader);
    checkpoint()?;
    let written = copied.map_err(|source| LoadError::Write {
        path: archive_path.clone(),
        source,
    })?;
    session.close_archive();
    tracing::info!(path = %archive_path.display(), bytes = written, "archive written");
    emit(format!("Wrote to {}\n", archive_path.display()))?;
    checkpoint()?;

    // Unpacking
    let scratch = session
        .scratch_dir()
        .ok_or(LoadError::Uninitialized)?
        .to_path_buf();
    emit("Unpacking tar.gz...".to_string())?;
    let entries = archive::unpack(&archive_path, &scratch)?;
    tracing::info!(entries, "archive unpacked");
    emit(" issue unpacked\n".to_string())?;
    checkpoint()?;

    // Indexing
    emit("Building UI\n".to_string())?;
    let page_count = archive::count_pages(&scratch).map_err(|source| LoadError::Index {
        path: scratch.clone(),
        source,
    })?;
    session.set_page_count(page_count);
    status
        .send(StatusEvent::Indexed { page_count })
        .map_err(|_| Stop::Cancelled)?;
    Ok(())
}

/// Drains `status` until a terminal event arrives, forwarding each event
/// through `forward`. Every `heartbeat` of silence forwards one
/// [`UiEvent::Heartbeat`]; the timer re-arms after every event. Returns
/// early if `forward` reports that nobody is listening.
pub fn supervise<F>(status: Receiver<StatusEvent>, heartbeat: Duration, mut forward: F)
where
    F: FnMut(UiEvent) -> bool,
{
    loop {
        crossbeam_channel::select! {
            recv(status) -> message => match message {
                Ok(StatusEvent::Text(text)) => {
                    if !forward(UiEvent::Status(text)) {
                        return;
                    }
                }
                Ok(StatusEvent::Indexed { page_count }) => {
                    if !forward(UiEvent::Indexed { page_count }) {
                        return;
                    }
                }
                Ok(StatusEvent::Failed(err)) => {
                    forward(UiEvent::Finished(Err(err)));
                    return;
                }
                // A vanished worker counts as finished.
                Ok(StatusEvent::Done) | Err(_) => {
                    forward(UiEvent::Finished(Ok(())));
                    return;
                }
            },
            default(heartbeat) => {
                if !forward(UiEvent::Heartbeat) {
                    return;
                }
            }
        }
    }
}
