//! Shared worker runtime primitives.
//!
//! * [`TaskClass`] tags every spawned task for tracing.
//! * [`GenerationClock`] / [`GenerationToken`] scope cancellation to one
//!   logical generation (one incarnation of a cache entry and its fetches).
//! * [`actor`] runs a single-owner event loop: one task owns the state, every
//!   mutation arrives as an explicit command.

pub mod actor;
mod class;
mod spawn;
mod token;

pub use actor::{Actor, ActorContext, ActorExit, ActorFlow, ActorHandle, ActorPort, ActorSpec, ShutdownMode, ShutdownReport};
pub use class::TaskClass;
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};

/// Receiver for broadcast actor events.
pub type ActorEventReceiver<Evt> = tokio::sync::broadcast::Receiver<Evt>;
