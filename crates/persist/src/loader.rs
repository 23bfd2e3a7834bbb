//! Asynchronous, file-backed portion loading.
//!
//! Requests are handed to a small pool of I/O threads. Results come back
//! over a channel and are only observed when the owner polls, so the window
//! is never mutated from a worker thread.

use mapstream_common::GlobalPortionCoord;
use mapstream_stream::LoadTicket;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::map::PortionBounds;
use crate::portion::{PortionContent, decode_portion};

/// Raw access to portion files.
pub trait PortionSource: Send + Sync {
    fn read(&self, coord: GlobalPortionCoord) -> io::Result<Vec<u8>>;
}

/// Name of the file holding a portion: `{x}_{y}_{z}.json`.
pub fn portion_file_name(coord: GlobalPortionCoord) -> String {
    format!("{}_{}_{}.json", coord.x, coord.y, coord.z)
}

/// Reads portion files from a map directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl PortionSource for DirectorySource {
    fn read(&self, coord: GlobalPortionCoord) -> io::Result<Vec<u8>> {
        std::fs::read(self.dir.join(portion_file_name(coord)))
    }
}

/// In-memory portion files, for tools and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: Mutex<HashMap<GlobalPortionCoord, Vec<u8>>>,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, coord: GlobalPortionCoord, bytes: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coord, bytes.into());
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl PortionSource for MemorySource {
    fn read(&self, coord: GlobalPortionCoord) -> io::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(&coord)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, portion_file_name(coord)))
    }
}

/// Errors from loading one portion. Fatal for that portion only.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("portion {coord}: read failed: {source}")]
    Io {
        coord: GlobalPortionCoord,
        #[source]
        source: io::Error,
    },
    #[error("portion {coord}: data corruption: {source}")]
    DataCorruption {
        coord: GlobalPortionCoord,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    pub fn coord(&self) -> GlobalPortionCoord {
        match self {
            LoadError::Io { coord, .. } | LoadError::DataCorruption { coord, .. } => *coord,
        }
    }
}

/// A finished load, tagged with the ticket it answers.
#[derive(Debug)]
pub struct LoadCompletion {
    pub ticket: LoadTicket,
    pub result: Result<Option<PortionContent>, LoadError>,
}

/// Read and decode one portion synchronously.
pub fn read_portion(
    source: &dyn PortionSource,
    coord: GlobalPortionCoord,
    honor_entry_point: bool,
) -> Result<Option<PortionContent>, LoadError> {
    let bytes = source
        .read(coord)
        .map_err(|source| LoadError::Io { coord, source })?;
    decode_portion(coord, &bytes, honor_entry_point)
        .map_err(|source| LoadError::DataCorruption { coord, source })
}

/// Background loader for portion files.
///
/// Coordinates outside the map resolve to absence without touching the
/// source. Issuing two loads for the same ticket is a caller error.
pub struct PortionLoader {
    bounds: PortionBounds,
    requests: Option<Sender<LoadTicket>>,
    completions: Receiver<LoadCompletion>,
    resolved: VecDeque<LoadCompletion>,
    workers: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl PortionLoader {
    /// Start `workers` I/O threads (at least one) reading from `source`.
    pub fn spawn(
        source: Arc<dyn PortionSource>,
        bounds: PortionBounds,
        workers: usize,
        honor_entry_point: bool,
    ) -> io::Result<Self> {
        let (request_tx, request_rx) = unbounded::<LoadTicket>();
        let (completion_tx, completion_rx) = unbounded();

        let mut handles = Vec::new();
        for i in 0..workers.max(1) {
            let requests = request_rx.clone();
            let completions = completion_tx.clone();
            let source = Arc::clone(&source);
            let handle = std::thread::Builder::new()
                .name(format!("portion-loader-{i}"))
                .spawn(move || worker_loop(requests, completions, source, honor_entry_point))?;
            handles.push(handle);
        }
        tracing::debug!(workers = handles.len(), "portion loader started");

        Ok(Self {
            bounds,
            requests: Some(request_tx),
            completions: completion_rx,
            resolved: VecDeque::new(),
            workers: handles,
            in_flight: 0,
        })
    }

    pub fn bounds(&self) -> PortionBounds {
        self.bounds
    }

    /// Loads issued to the workers and not yet polled.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.resolved.is_empty()
    }

    /// Issue a load. The result shows up in a later [`poll`](Self::poll).
    pub fn load(&mut self, ticket: LoadTicket) {
        if !self.bounds.contains(ticket.coord) {
            self.resolved.push_back(LoadCompletion {
                ticket,
                result: Ok(None),
            });
            return;
        }
        let sent = self
            .requests
            .as_ref()
            .is_some_and(|tx| tx.send(ticket).is_ok());
        if sent {
            self.in_flight += 1;
        } else {
            self.resolved.push_back(LoadCompletion {
                ticket,
                result: Err(LoadError::Io {
                    coord: ticket.coord,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "loader workers stopped"),
                }),
            });
        }
    }

    /// Take every completion available right now, without blocking.
    pub fn poll(&mut self) -> Vec<LoadCompletion> {
        let mut out: Vec<LoadCompletion> = self.resolved.drain(..).collect();
        loop {
            match self.completions.try_recv() {
                Ok(done) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    out.push(done);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Block until every issued load has completed or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<LoadCompletion> {
        let deadline = Instant::now() + timeout;
        let mut out: Vec<LoadCompletion> = self.resolved.drain(..).collect();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completions.recv_timeout(remaining) {
                Ok(done) => {
                    self.in_flight -= 1;
                    out.push(done);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        in_flight = self.in_flight,
                        "timed out waiting for portion loads"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        out
    }
}

impl Drop for PortionLoader {
    fn drop(&mut self) {
        // Closing the request channel stops the workers once the queue is empty.
        self.requests.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("portion loader worker panicked");
            }
        }
    }
}

fn worker_loop(
    requests: Receiver<LoadTicket>,
    completions: Sender<LoadCompletion>,
    source: Arc<dyn PortionSource>,
    honor_entry_point: bool,
) {
    while let Ok(ticket) = requests.recv() {
        let result = read_portion(source.as_ref(), ticket.coord, honor_entry_point);
        if completions.send(LoadCompletion { ticket, result }).is_err() {
            break;
        }
    }
}
