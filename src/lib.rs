#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![doc = include_str!("../README.md")]

pub mod barrier;
pub use barrier::PhaseBarrier;

pub mod cancel;
pub use cancel::{CancellationSource, CancellationToken};

pub mod config;
pub use config::{Config, DefaultConfig};

pub mod counter;
pub use counter::AtomicCounter;

pub mod error;
pub use error::{BarrierPhaseFault, BoxError, Error};

pub mod gate;
pub use gate::{AutoResetGate, ManualResetGate};

pub mod latch;
pub use latch::CountdownLatch;

pub mod mutex;
pub use mutex::Mutex;

pub mod semaphore;
pub use semaphore::AdmissionSemaphore;

#[cfg(not(feature = "loom"))]
mod lock_api;
#[cfg(not(feature = "loom"))]
pub use lock_api::{DataMutex, DataMutexGuard};

mod opcode;
mod sync_primitive;
mod wait_queue;

#[cfg(test)]
mod tests;
