//! Job lifecycle events, their fan-out, and the job store that emits them.
//!
//! The store is usable by any front end: subscribe a listener for ordered
//! per-job delivery, or take [`JobStore::events`] for an async stream.

pub mod event_bus;
pub mod job_event;
pub mod job_store;

pub use event_bus::{EventBus, JobEventListener, SubscriptionHandle};
pub use job_event::{JobEvent, JobEventKind, JobEventPayload};
pub use job_store::{JobStore, TransitionContext};
