//! The dedicated read thread: pumps decompressed chunks from the input
//! descriptor into the chunk queue until EOF, an error, or the shared done
//! flag. The queue is closed on every exit path so the framing layer never
//! blocks forever, and the decompressor (and with it the descriptor) is
//! released when the thread exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::compression::Decompressor;
use crate::error::Error;
use crate::queue::SharedQueue;

/// One-shot cell where background threads park the first error they hit.
/// `Reader::next_batch` re-raises it on the consumer side.
pub(crate) type ErrorCell = Arc<Mutex<Option<Error>>>;

pub(crate) fn park_error(cell: &ErrorCell, error: Error) {
    let mut slot = cell.lock();
    if slot.is_none() {
        *slot = Some(error);
    }
}

pub(crate) fn spawn(
    mut decompressor: Box<dyn Decompressor + Send>,
    queue: SharedQueue<Vec<u8>>,
    done: Arc<AtomicBool>,
    errors: ErrorCell,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("osmstream-read".to_string())
        .spawn(move || {
            while !done.load(Ordering::SeqCst) {
                match decompressor.read() {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => queue.push(chunk),
                    Err(error) => {
                        park_error(&errors, error);
                        break;
                    }
                }
            }
            decompressor.close();
            queue.close();
        })
}
