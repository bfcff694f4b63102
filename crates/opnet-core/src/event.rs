//! Cross-device completion events.
//!
//! Every operator carries an [`Event`]: a small four-state signal used by the
//! scheduler to order chains across devices. Events are internally
//! thread-safe; the scheduler queries, waits on, and force-finishes them from
//! worker threads without external locking.
//!
//! The [`Event::can_schedule`] policy table is the single authoritative rule
//! for when a child chain may be dispatched given a parent's status. Both the
//! batch check over a status snapshot and the pairwise check consult it.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::types::DeviceType;

/// Lifecycle status of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Freshly created or reset; no work recorded yet.
    Initialized,
    /// Work has been enqueued on the device but has not completed.
    Scheduled,
    /// Terminal: the recorded work completed successfully.
    Success,
    /// Terminal: the recorded work failed; a message may be attached.
    Failed,
}

impl EventStatus {
    /// Whether the status is `Success` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Success | EventStatus::Failed)
    }
}

#[derive(Debug)]
struct EventState {
    status: EventStatus,
    message: Option<String>,
}

/// Per-operator completion signal.
///
/// The chain planner disables the events of inner chain operators; only head
/// and tail events participate in cross-chain synchronization.
#[derive(Debug)]
pub struct Event {
    device_type: DeviceType,
    state: Mutex<EventState>,
    finished: Condvar,
    disabled: AtomicBool,
}

impl Event {
    /// Create an event for the given device family.
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            state: Mutex::new(EventState {
                status: EventStatus::Initialized,
                message: None,
            }),
            finished: Condvar::new(),
            disabled: AtomicBool::new(false),
        }
    }

    /// Device family this event signals on.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Current status.
    pub fn query(&self) -> EventStatus {
        self.state.lock().status
    }

    /// Error message attached by [`Event::set_finished`], if any.
    pub fn error_message(&self) -> Option<String> {
        self.state.lock().message.clone()
    }

    /// Record that work has been enqueued on the device.
    ///
    /// No-op unless the event is `Initialized`.
    pub fn set_scheduled(&self) {
        let mut state = self.state.lock();
        if state.status == EventStatus::Initialized {
            state.status = EventStatus::Scheduled;
        }
    }

    /// Force the event into a terminal state and wake waiters.
    ///
    /// `Success` without a message, `Failed` with one. The first terminal
    /// transition wins; later calls are no-ops.
    pub fn set_finished(&self, err_msg: Option<&str>) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        match err_msg {
            Some(msg) => {
                state.status = EventStatus::Failed;
                state.message = Some(msg.to_string());
            }
            None => state.status = EventStatus::Success,
        }
        drop(state);
        self.finished.notify_all();
    }

    /// Block until the event reaches a terminal status.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        while !state.status.is_terminal() {
            self.finished.wait(&mut state);
        }
    }

    /// Return the event to `Initialized` for the next run.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.status = EventStatus::Initialized;
        state.message = None;
    }

    /// Permanently exclude this event from synchronization. Used for inner
    /// chain operators when profiling is off.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    /// Whether [`Event::disable`] was called.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Block the calling worker until every event is terminal.
    ///
    /// Host-side fallback wait used by operators without a device-side
    /// stream wait.
    pub fn finish_all(events: &[&Event]) {
        for event in events {
            event.finish();
        }
    }

    /// Cross-device schedulability policy.
    ///
    /// Decides whether a child chain may be dispatched given the status of
    /// one parent's completion event:
    /// - a `Success` parent always admits the child;
    /// - a `Failed` parent never does (failure poisons descendants);
    /// - a `Scheduled` parent admits the child only when both sides are on
    ///   the same async-capable device family and the child opts in via
    ///   `supports_async_scheduling`; the device's own stream ordering then
    ///   guarantees the parent's work retires first;
    /// - an `Initialized` parent never admits the child.
    pub fn can_schedule(
        parent_type: DeviceType,
        parent_status: EventStatus,
        child_type: DeviceType,
        child_supports_async: bool,
    ) -> bool {
        match parent_status {
            EventStatus::Success => true,
            EventStatus::Failed => false,
            EventStatus::Scheduled => {
                parent_type == child_type
                    && parent_type.is_async_capable()
                    && child_supports_async
            }
            EventStatus::Initialized => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_lifecycle() {
        let event = Event::new(DeviceType::Cpu);
        assert_eq!(event.query(), EventStatus::Initialized);

        event.set_scheduled();
        assert_eq!(event.query(), EventStatus::Scheduled);

        event.set_finished(None);
        assert_eq!(event.query(), EventStatus::Success);
        assert!(event.error_message().is_none());

        event.reset();
        assert_eq!(event.query(), EventStatus::Initialized);
    }

    #[test]
    fn test_set_finished_with_message_fails() {
        let event = Event::new(DeviceType::Cpu);
        event.set_finished(Some("boom"));
        assert_eq!(event.query(), EventStatus::Failed);
        assert_eq!(event.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn test_first_terminal_transition_wins() {
        let event = Event::new(DeviceType::Cpu);
        event.set_finished(Some("first"));
        event.set_finished(None);
        event.set_finished(Some("second"));
        assert_eq!(event.query(), EventStatus::Failed);
        assert_eq!(event.error_message().as_deref(), Some("first"));
    }

    #[test]
    fn test_set_scheduled_only_from_initialized() {
        let event = Event::new(DeviceType::Gpu);
        event.set_finished(None);
        event.set_scheduled();
        assert_eq!(event.query(), EventStatus::Success);
    }

    #[test]
    fn test_finish_blocks_until_terminal() {
        let event = Arc::new(Event::new(DeviceType::Cpu));
        let signaller = Arc::clone(&event);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaller.set_finished(None);
        });
        event.finish();
        assert_eq!(event.query(), EventStatus::Success);
        handle.join().unwrap();
    }

    #[test]
    fn test_disable() {
        let event = Event::new(DeviceType::Cpu);
        assert!(!event.is_disabled());
        event.disable();
        assert!(event.is_disabled());
        event.reset();
        assert!(event.is_disabled());
    }

    #[test]
    fn test_policy_success_and_failed() {
        for child_type in [DeviceType::Cpu, DeviceType::Gpu] {
            for supports_async in [false, true] {
                assert!(Event::can_schedule(
                    DeviceType::Cpu,
                    EventStatus::Success,
                    child_type,
                    supports_async
                ));
                assert!(!Event::can_schedule(
                    DeviceType::Cpu,
                    EventStatus::Failed,
                    child_type,
                    supports_async
                ));
            }
        }
    }

    #[test]
    fn test_policy_scheduled_requires_same_async_family() {
        // Same accelerator family with an opted-in child: early start allowed.
        assert!(Event::can_schedule(
            DeviceType::Gpu,
            EventStatus::Scheduled,
            DeviceType::Gpu,
            true
        ));
        // Child did not opt in.
        assert!(!Event::can_schedule(
            DeviceType::Gpu,
            EventStatus::Scheduled,
            DeviceType::Gpu,
            false
        ));
        // Cross-family never starts early.
        assert!(!Event::can_schedule(
            DeviceType::Gpu,
            EventStatus::Scheduled,
            DeviceType::Cpu,
            true
        ));
        // The CPU family has no stream ordering to rely on.
        assert!(!Event::can_schedule(
            DeviceType::Cpu,
            EventStatus::Scheduled,
            DeviceType::Cpu,
            true
        ));
    }

    #[test]
    fn test_policy_initialized_never_schedules() {
        assert!(!Event::can_schedule(
            DeviceType::Gpu,
            EventStatus::Initialized,
            DeviceType::Gpu,
            true
        ));
    }
}
