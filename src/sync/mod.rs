//! Thread-per-connection query execution.

mod conn;
mod pool;
mod worker;

pub use conn::{Connect, Connection};
pub use pool::{Pool, PoolStatus};
