//! Unit-of-work construction for tests.

use std::sync::Arc;

use tasktrail_core::event::{EventDispatcher, TracingEventDispatcher};
use tasktrail_core::retry::RetryPolicy;
use tasktrail_core::trace::TraceInfo;
use tasktrail_core::unit_of_work::UnitOfWork;

/// A context with no deadline, no retry delay and a logging dispatcher.
#[must_use]
pub fn unit_of_work() -> UnitOfWork {
    unit_of_work_with(Arc::new(TracingEventDispatcher))
}

/// A context with no deadline and no retry delay that dispatches to
/// `dispatcher`. Compensations and dispatch are retried twice.
#[must_use]
pub fn unit_of_work_with(dispatcher: Arc<dyn EventDispatcher>) -> UnitOfWork {
    let trace = TraceInfo {
        version: "00".to_owned(),
        trace_id: "0af7651916cd43dd8448eb211c80319c".to_owned(),
        parent_id: "b7ad6b7169203331".to_owned(),
        request_id: "00f067aa0ba902b7".to_owned(),
        flags: "01".to_owned(),
    };
    UnitOfWork::new(trace, RetryPolicy::immediate(2), dispatcher)
}
