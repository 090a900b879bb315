mod queue;
mod signal;

pub use queue::GuardedQueue;
pub use signal::WaitSignal;
