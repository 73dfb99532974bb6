//! Background flushing of the working copy into the sealed file.
//!
//! - [`FlushScheduler`] decides *when*: debounced requests, one worker
//!   thread, at most one sequence in flight.
//! - [`SealPipeline`] decides *what*: checkpoint the live connection, read
//!   the working copy, seal it, atomically replace the sealed file.
//!
//! The two meet at the [`FlushTarget`] trait so the scheduler can be driven
//! without a database.

mod pipeline;
mod scheduler;

pub use pipeline::{FlushReport, FlushTarget, SealPipeline, SharedConnection};
pub use scheduler::{FlushPhase, FlushScheduler, FlushStatus, SchedulerConfig};
