//! Accelerator stream selection.
//!
//! Each worker thread keeps its own round-robin counter per accelerator
//! device, so stream assignment is lock-free. Exact balance across workers
//! is not required; independent per-worker rotation is enough to spread
//! chains over the device's streams.

use std::cell::RefCell;

thread_local! {
    static STREAM_COUNTERS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Pick the stream for an accelerator chain on `gpu_id`.
///
/// Advances this worker's counter for the device, wrapping at
/// `streams_per_gpu`. With `check_status`, busy streams (per `is_free`) are
/// skipped, bounded by `streams_per_gpu` attempts; the last stream tried is
/// accepted regardless.
pub(crate) fn next_stream(
    gpu_id: usize,
    streams_per_gpu: usize,
    check_status: bool,
    mut is_free: impl FnMut(usize) -> bool,
) -> usize {
    STREAM_COUNTERS.with(|counters| {
        let mut counters = counters.borrow_mut();
        if counters.len() <= gpu_id {
            counters.resize(gpu_id + 1, 0);
        }

        let mut stream_id = take_next(&mut counters, gpu_id, streams_per_gpu);
        if check_status {
            let mut attempts = 1;
            while attempts < streams_per_gpu && !is_free(stream_id) {
                stream_id = take_next(&mut counters, gpu_id, streams_per_gpu);
                attempts += 1;
            }
        }
        stream_id
    })
}

fn take_next(counters: &mut [usize], gpu_id: usize, streams_per_gpu: usize) -> usize {
    let stream_id = counters[gpu_id] % streams_per_gpu;
    counters[gpu_id] = (stream_id + 1) % streams_per_gpu;
    stream_id
}
