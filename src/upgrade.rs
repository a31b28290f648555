//! Drives a full store upgrade: scan, reconstruct, hand every row to the
//! caller's sink.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::row::RowView;
use crate::scan::{index_segments, reconstruct, Container, TableKey};
use crate::schema::RowSchema;
use crate::store::Store;

/// Receives the reconstructed rows of one table.
pub trait RowSink {
    fn row(&mut self, row: &RowView<'_>) -> Result<()>;
}

/// The caller's side of an upgrade: asked once per table for a sink bound
/// to that table's reconstructed schema. Re-encoding rows into the new
/// format is entirely the target's business.
pub trait UpgradeTarget {
    fn table(&mut self, key: &TableKey, schema: &RowSchema) -> Result<Box<dyn RowSink>>;
}

/// Counters for one completed run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub tables: usize,
    pub pages: u64,
    pub rows: u64,
    pub skipped_pages: u64,
}

/// Replays the live contents of a closed v10 store through an upgrade
/// target, table by table.
pub struct Upgrader<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> Upgrader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Upgrader { store }
    }

    /// Scan the store and feed every reconstructed row to the target.
    ///
    /// Tables are visited in name order for deterministic output; pages in
    /// ascending pid order. A page that fails to reconstruct is skipped
    /// and counted; sink errors abort the run.
    pub fn run(&self, target: &mut dyn UpgradeTarget) -> Result<UpgradeReport> {
        let container = Container::open(self.store)?;

        let mut tables: Vec<_> = container.tables().iter().collect();
        tables.sort_by(|a, b| a.schema().name().cmp(b.schema().name()));

        let mut report = UpgradeReport::default();

        for table in tables {
            let mut sink = target.table(table.key(), table.schema())?;

            let segments = container.table_segments(table.key());
            let pages = index_segments(self.store, &segments);

            debug!(
                table = %table.schema().name(),
                segments = segments.len(),
                pages = pages.len(),
                "upgrading table"
            );

            for page in pages.values() {
                match reconstruct(self.store, table, page) {
                    Ok(rows) => {
                        for image in rows.values() {
                            let view =
                                RowView::new(table.schema(), image.data(), image.offset());
                            sink.row(&view)?;
                            report.rows += 1;
                        }
                        report.pages += 1;
                    }
                    Err(e) => {
                        warn!(
                            table = %table.schema().name(),
                            pid = page.pid(),
                            error = %e,
                            "skipping malformed page"
                        );
                        report.skipped_pages += 1;
                    }
                }
            }

            report.tables += 1;
        }

        info!(
            tables = report.tables,
            rows = report.rows,
            skipped_pages = report.skipped_pages,
            "upgrade complete"
        );

        Ok(report)
    }
}
