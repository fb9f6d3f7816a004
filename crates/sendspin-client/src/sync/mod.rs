//! Clock synchronization with the server
//!
//! - `clock`: local monotonic time base
//! - `kalman`: offset/drift filter
//! - `engine`: request/response matching and the shared estimate

pub mod clock;
pub mod engine;
pub mod kalman;

pub use clock::MonotonicClock;
pub use engine::{SharedClock, SyncEngine, SyncRejection};
pub use kalman::{raw_offset, ClockEstimate, KalmanClock};
