//! Scanner and row upgrade pipeline for legacy Kelp v10 store files.
//!
//! Opens a closed, no-longer-written store, reconstructs the live contents
//! of every table it holds (base leaf rows plus layered deltas) and replays
//! each row through a caller-supplied [`upgrade::UpgradeTarget`] so it can
//! be re-encoded into a newer format.
//!
//! ```no_run
//! use kelpscan::store::FileStore;
//! use kelpscan::upgrade::Upgrader;
//! # fn run(target: &mut dyn kelpscan::upgrade::UpgradeTarget) -> kelpscan::Result<()> {
//! let store = FileStore::open("store.db")?;
//! let report = Upgrader::new(&store).run(target)?;
//! println!("upgraded {} rows across {} tables", report.rows, report.tables);
//! # Ok(())
//! # }
//! ```

pub mod bits;
pub mod dump;
pub mod error;
pub mod row;
pub mod scan;
pub mod schema;
pub mod store;
pub mod upgrade;

pub use error::{Error, Result};
pub use row::RowView;
pub use scan::{is_version_supported, Container, TableEntry, TableKey};
pub use schema::{Column, ColumnType, RowSchema};
pub use store::{FileStore, MemStore, Store};
pub use upgrade::{RowSink, UpgradeReport, UpgradeTarget, Upgrader};
