//! Operator contract and per-operator scheduling bookkeeping.
//!
//! Operator implementations live outside the engine; the scheduler drives
//! them through the [`Operator`] trait. [`OperatorNode`] wraps each operator
//! with the two pieces of mutable per-run state the scheduler needs: the
//! remaining-parent counter and the dispatched-once flag of the chain the
//! operator heads.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::NetResult;
use crate::event::Event;
use crate::types::DeviceOption;

/// Contract between the scheduler and operator implementations.
///
/// `run_async` may return before device-side work completes; the operator's
/// [`Event`] tracks actual completion. Returning `Ok(false)` reports an
/// operator failure (recorded, no exception); returning `Err` reports an
/// operator exception (captured and re-raised by `handle_run_error`).
pub trait Operator: Send + Sync {
    /// Operator type name, used in diagnostics and profiling reports.
    fn op_type(&self) -> &str;

    /// Device this operator is bound to.
    fn device_option(&self) -> &DeviceOption;

    /// This operator's completion event.
    fn event(&self) -> &Event;

    /// Launch the operator on the given stream.
    fn run_async(&self, stream_id: usize) -> NetResult<bool>;

    /// Whether dependent work may be enqueued behind this operator before
    /// its event is terminal, relying on device-side stream ordering.
    fn supports_async_scheduling(&self) -> bool {
        false
    }

    /// Whether the given stream has no outstanding work.
    fn is_stream_free(&self, _stream_id: usize) -> bool {
        true
    }

    /// Make the given stream wait on `events` before later work proceeds.
    ///
    /// The default is the synchronous host behavior: block the calling
    /// worker until every event is terminal. Accelerator operators override
    /// this with a device-side wait on the stream.
    fn wait_events(&self, events: &[&Event], stream_id: usize) {
        let _ = stream_id;
        Event::finish_all(events);
    }

    /// Block until this operator's device-side work completes.
    fn finish(&self) {
        self.event().finish();
    }

    /// Reset this operator's event for the next run.
    fn reset_event(&self) {
        self.event().reset();
    }

    /// Exclude this operator's event from synchronization.
    fn disable_event(&self) {
        self.event().disable();
    }
}

/// Per-operator scheduling state.
///
/// The counter and flag are only meaningful on chain-head operators; the
/// scheduler stores chain state on the head so the node table stays a flat
/// parallel vector.
pub struct OperatorNode {
    op: Arc<dyn Operator>,
    runtime_parent_count: AtomicI64,
    scheduled: AtomicBool,
}

impl OperatorNode {
    /// Wrap an operator with cleared scheduling state.
    pub fn new(op: Arc<dyn Operator>) -> Self {
        Self {
            op,
            runtime_parent_count: AtomicI64::new(0),
            scheduled: AtomicBool::new(false),
        }
    }

    /// The wrapped operator.
    pub fn operator(&self) -> &Arc<dyn Operator> {
        &self.op
    }

    /// Remaining unfulfilled parent chains.
    pub fn parent_count(&self) -> i64 {
        self.runtime_parent_count.load(Ordering::Acquire)
    }

    /// Reinitialize the counter at the start of a run.
    pub fn set_parent_count(&self, count: usize) {
        self.runtime_parent_count
            .store(count as i64, Ordering::Release);
    }

    /// Atomically decrement the counter and return the new value.
    pub fn decrement_parent_count(&self) -> i64 {
        self.runtime_parent_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Set the dispatched flag; `true` exactly once per run.
    pub fn test_and_set_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Clear the dispatched flag at the start of a run.
    pub fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }
}
