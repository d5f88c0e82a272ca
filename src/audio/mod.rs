//! Real-time audio pipelines

pub mod buffer;
pub mod capture;
pub mod playback;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{BlockRing, JitterQueue};
pub use capture::{PacketAssembler, TxPipeline};
pub use playback::{PacketInbox, RxPipeline};
pub use stats::PipelineStats;

use std::thread::JoinHandle;

/// Join a worker thread, returning what it handed back unless it panicked
fn join_worker<T>(handle: JoinHandle<T>, name: &str) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!("{} thread panicked", name);
            None
        }
    }
}
