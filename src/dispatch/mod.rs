//! Dispatch: queue workers and the immediate path over one pipeline

pub mod pipeline;
pub mod queue;
pub mod submit;
pub mod task;
pub mod worker;

pub use pipeline::{ActionResult, Pipeline, ProcessOutcome};
pub use queue::TaskQueue;
pub use submit::{process_now, Dispatcher};
pub use task::{OfferTrigger, Task, TaskStatus};
pub use worker::WorkerPool;
