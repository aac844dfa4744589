//! The user-facing reader: glue around source, decompressor, framing,
//! worker pool, and the ordered completion queue.
//!
//! Construction parses the mandatory OSMHeader block synchronously so the
//! header is available immediately; data blocks are framed by a dispatch
//! thread, parsed on the worker pool, and delivered through
//! [`next_batch`](Reader::next_batch) in exact on-disk order.

use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace};

use crate::block::{parse_data_payload, parse_header_payload};
use crate::buffer::EntityBuffer;
use crate::compression::Compression;
use crate::entity::EntityMask;
use crate::error::{Error, Result};
use crate::frame::FrameReader;
use crate::header::Header;
use crate::pool::{JobHandle, WorkerPool};
use crate::queue::SharedQueue;
use crate::read_thread::{self, park_error, ErrorCell};
use crate::source::Source;

/// Interval between back-pressure polls on the dispatch thread.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(10);

/// Construction-time tunables. The defaults match planet-file workloads.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub entity_mask: EntityMask,
    /// Explicit compression; `None` detects from the file name suffix.
    pub compression: Option<Compression>,
    /// High-water mark for parse jobs submitted but not yet finished.
    pub max_pending_jobs: usize,
    /// High-water mark for completed-but-unconsumed batches.
    pub max_queued_batches: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            entity_mask: EntityMask::ALL,
            compression: None,
            max_pending_jobs: 10,
            max_queued_batches: 20,
        }
    }
}

pub struct Reader {
    header: Header,
    entity_mask: EntityMask,
    done: Arc<AtomicBool>,
    errors: ErrorCell,
    batches: SharedQueue<JobHandle<Result<EntityBuffer>>>,
    read_thread: Option<JoinHandle<()>>,
    dispatch_thread: Option<JoinHandle<()>>,
    pool: Option<Arc<WorkerPool>>,
    child: Option<Child>,
    finished: bool,
    closed: bool,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("finished", &self.finished)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Reader {
    /// Opens `path` (a file path or an `http`/`https`/`ftp`/`file` URL) and
    /// parses its header. If `entity_mask` is non-empty, background parsing
    /// of data blocks starts immediately.
    pub fn new(path: &str, entity_mask: EntityMask) -> Result<Reader> {
        Self::with_options(
            path,
            ReaderOptions {
                entity_mask,
                ..Default::default()
            },
        )
    }

    pub fn with_options(path: &str, options: ReaderOptions) -> Result<Reader> {
        let source = Source::open(path)?;
        let compression = options
            .compression
            .unwrap_or_else(|| Compression::detect(path));
        let decompressor = compression.decompressor(source.fd);

        let chunk_queue: SharedQueue<Vec<u8>> = SharedQueue::new();
        let done = Arc::new(AtomicBool::new(false));
        let errors = ErrorCell::default();

        let read_thread =
            read_thread::spawn(decompressor, chunk_queue.clone(), done.clone(), errors.clone())
                .map_err(|e| Error::system("spawning read thread failed", e))?;

        let mut reader = Reader {
            header: Header::default(),
            entity_mask: options.entity_mask,
            done,
            errors,
            batches: SharedQueue::new(),
            read_thread: Some(read_thread),
            dispatch_thread: None,
            pool: None,
            child: source.child,
            finished: false,
            closed: false,
        };

        let mut frames = FrameReader::new(chunk_queue);
        reader.header = match read_header(&mut frames) {
            Ok(header) => header,
            Err(error) => {
                // prefer the root cause parked by the read thread over the
                // framing symptom seen on this side
                let error = reader.errors.lock().take().unwrap_or(error);
                let _ = reader.close();
                return Err(error);
            }
        };
        debug!("parsed file header: {:?}", reader.header);

        if reader.entity_mask.is_empty() {
            // header-only construction: stop the read thread right away
            reader.done.store(true, Ordering::SeqCst);
            reader.finished = true;
            return Ok(reader);
        }

        let pool = Arc::new(WorkerPool::with_default_threads());
        reader.pool = Some(pool.clone());
        let dispatch = Dispatcher {
            frames,
            pool,
            batches: reader.batches.clone(),
            done: reader.done.clone(),
            errors: reader.errors.clone(),
            entity_mask: reader.entity_mask,
            max_pending_jobs: options.max_pending_jobs,
            max_queued_batches: options.max_queued_batches,
        };
        match std::thread::Builder::new()
            .name("osmstream-dispatch".to_string())
            .spawn(move || dispatch.run())
        {
            Ok(thread) => reader.dispatch_thread = Some(thread),
            Err(e) => {
                let _ = reader.close();
                return Err(Error::system("spawning dispatch thread failed", e));
            }
        }

        Ok(reader)
    }

    /// The header parsed during construction.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the next parsed batch, blocking until one is ready. `None`
    /// signals end of input and stays `None` on further calls. After a
    /// background failure, batches parsed before the failure are still
    /// delivered in order; the call that would pass the failure point
    /// re-raises the parked error, and later calls yield end-of-stream.
    pub fn next_batch(&mut self) -> Result<Option<EntityBuffer>> {
        if self.finished {
            return Ok(None);
        }

        match self.batches.wait_and_pop() {
            Some(handle) => match handle.wait() {
                Some(Ok(batch)) => Ok(Some(batch)),
                Some(Err(error)) => {
                    self.finished = true;
                    Err(error)
                }
                // job cancelled by shutdown
                None => {
                    self.finished = true;
                    Ok(None)
                }
            },
            None => {
                self.finished = true;
                match self.errors.lock().take() {
                    Some(error) => Err(error),
                    None => Ok(None),
                }
            }
        }
    }

    /// Stops the background threads, joins them, releases the descriptor,
    /// and reaps the subprocess if one was spawned. Safe to call more than
    /// once; also runs from Drop.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finished = true;
        self.done.store(true, Ordering::SeqCst);

        // the read thread closes the chunk queue on exit, which unblocks
        // the dispatch thread in turn
        if let Some(thread) = self.read_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.dispatch_thread.take() {
            let _ = thread.join();
        }
        while self.batches.try_pop().is_some() {}
        // last pool reference: joins the workers, cancelling queued jobs
        self.pool.take();

        if let Some(mut child) = self.child.take() {
            let status = child
                .wait()
                .map_err(|e| Error::system("waiting for subprocess failed", e))?;
            if !status.success() {
                return Err(Error::Subprocess {
                    command: crate::source::FETCH_COMMAND.to_string(),
                    status,
                });
            }
        }
        Ok(())
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn read_header(frames: &mut FrameReader) -> Result<Header> {
    let size = frames.read_frame("OSMHeader")?;
    if size == 0 {
        return Err(Error::protocol("missing OSMHeader block", Some(0)));
    }
    let payload = frames.read_payload(size)?;
    parse_header_payload(&payload)
}

struct Dispatcher {
    frames: FrameReader,
    pool: Arc<WorkerPool>,
    batches: SharedQueue<JobHandle<Result<EntityBuffer>>>,
    done: Arc<AtomicBool>,
    errors: ErrorCell,
    entity_mask: EntityMask,
    max_pending_jobs: usize,
    max_queued_batches: usize,
}

impl Dispatcher {
    fn run(mut self) {
        while !self.done.load(Ordering::SeqCst) {
            let size = match self.frames.read_frame("OSMData") {
                Ok(0) => break,
                Ok(size) => size,
                Err(error) => {
                    park_error(&self.errors, error);
                    break;
                }
            };
            let payload = match self.frames.read_payload(size) {
                Ok(payload) => payload,
                Err(error) => {
                    park_error(&self.errors, error);
                    break;
                }
            };

            let block_index = self.frames.current_frame();
            let mask = self.entity_mask;
            trace!("dispatching parse job for block {block_index}");
            let handle = self
                .pool
                .submit(move || parse_data_payload(&payload, mask, block_index));
            self.batches.push(handle);

            // wait while either high-water mark is exceeded
            while !self.done.load(Ordering::SeqCst)
                && (self.pool.pending() >= self.max_pending_jobs
                    || self.batches.len() >= self.max_queued_batches)
            {
                std::thread::sleep(BACKPRESSURE_POLL);
            }
        }
        self.batches.close();
    }
}
