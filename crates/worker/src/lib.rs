//! Background worker: claims queued scan jobs and executes them under a
//! cooperative rate-limit gate that never exceeds the provider's remaining
//! budget, no matter how many jobs run concurrently.

pub mod gate;
pub mod runner;

pub use gate::RateLimitGate;
pub use runner::{Worker, WorkerConfig};
