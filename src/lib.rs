//! Thread-per-connection PostgreSQL query execution with ordered, backpressured
//! result streams.
//!
//! # Features
//!
//! - **Fixed slot pool**: one dedicated thread per physical connection, opened eagerly
//! - **Fail-fast admission**: a bounded FIFO queue; saturation is an immediate error
//! - **Ordered events**: rows in batches of 5000, statuses, warnings and one terminal error
//! - **Backpressure**: workers emit only as fast as the consumer requests
//! - **Driver-agnostic**: wire I/O lives behind the [`Connection`](sync::Connection) trait
//!
//! # Example
//!
//! ```no_run
//! use zero_pgpool::sync::{Connection, Pool};
//! use zero_pgpool::{Opts, Query, ResultEvent, ResultHandler};
//!
//! struct Driver;
//!
//! impl Connection for Driver {
//!     fn execute(&mut self, _query: &Query, handler: &mut dyn ResultHandler) -> zero_pgpool::Result<()> {
//!         handler.command_complete("SET", 0, None)?;
//!         handler.execution_finished(None);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> zero_pgpool::Result<()> {
//!     let opts = Opts::try_from("postgres://app@localhost/db?max_pool_size=4&queue_depth=8")?;
//!     let pool = Pool::new(opts, |_: &Opts| -> zero_pgpool::Result<Driver> { Ok(Driver) })?;
//!
//!     for event in pool.submit("SET search_path TO app")? {
//!         if let ResultEvent::Error(err) = event {
//!             eprintln!("{}", err);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event;
pub mod handler;
pub mod opts;
pub mod query;
pub mod row;
pub mod state;
pub mod stream;
pub mod sync;
pub mod value;
pub mod view;

pub use error::{Error, ErrorFields, Result};
pub use event::{
    CommandStatus, Field, FormatCode, Oid, Progress, QueryError, ResultEvent, RowBatch,
    StatementIndex, Warning,
};
pub use handler::{DropHandler, ResultHandler};
pub use opts::Opts;
pub use query::{Query, QueryBuilder, Statement};
pub use row::Row;
pub use state::{ROW_BATCH_SIZE, ResultAdapter};
pub use stream::ResultStream;
pub use value::FromValue;
