mod queue;
mod scheduler;
mod transport;

pub use queue::{DrainDue, EventQueue, MAX_CAPACITY as MAX_QUEUE_CAPACITY};
pub use scheduler::{Renderer, Scheduler};
pub use transport::{Transport, TransportState};
