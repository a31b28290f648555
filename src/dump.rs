//! Human-readable description of a v10 container, segment by segment.
//!
//! Uses the same read paths as the scanner; nothing here parses container
//! structures on its own.

use std::io::Write;

use crate::error::Result;
use crate::scan::segment::read_index_entries;
use crate::scan::{short_key, Container, PageType, Segment, TableEntry};
use crate::store::{Store, StoreReader};

/// Write a description of every finalized segment and its index entries.
///
/// Segments whose table is unknown (its meta record was damaged or its
/// schema undecodable) are left out, matching what the scanner can
/// actually process.
pub fn dump<S: Store + ?Sized>(store: &S, out: &mut dyn Write) -> Result<()> {
    let container = Container::open(store)?;

    for segment in container.segments() {
        let table = container
            .tables()
            .iter()
            .find(|t| t.key() == segment.table_key());
        let Some(table) = table else { continue };

        writeln!(out)?;
        writeln!(
            out,
            "Segment {} (seq: {}, table: {}, addr: 0x{:x}, len: 0x{:x})",
            segment.extent().id(),
            segment.sequence(),
            short_key(segment.table_key()),
            segment.extent().address(),
            segment.extent().length(),
        )?;

        match read_index_entries(store, segment) {
            Ok(entries) => {
                for entry in entries {
                    dump_entry(store, out, segment, table, &entry)?;
                }
            }
            Err(e) => writeln!(out, "  unindexable: {}", e)?,
        }
    }

    Ok(())
}

fn dump_entry<S: Store + ?Sized>(
    store: &S,
    out: &mut dyn Write,
    segment: &Segment,
    table: &TableEntry,
    entry: &crate::scan::segment::IndexEntry,
) -> Result<()> {
    let label = match entry.page_type {
        PageType::Leaf => "LEAF",
        PageType::LeafDelta => "LEAF_DELTA",
        PageType::Tree => "TREE",
        PageType::Blob => "BLOB",
        PageType::BlobTemp => "BLOB_TEMP",
        PageType::BlobFree => "BLOB_FREE",
        PageType::None => "NONE",
    };

    write!(
        out,
        "  {} pid:{} next:{} offset:{} length:{}",
        label, entry.pid, entry.next_pid, entry.address, entry.length
    )?;

    if entry.page_type == PageType::Leaf {
        if let Ok((min_key, max_key)) = leaf_bounds(store, segment, entry.address, table) {
            write!(out, " [{},{}]", format_key(&min_key), format_key(&max_key))?;
        }
    }

    writeln!(out)?;
    Ok(())
}

/// Min/max key bounds from the front of a leaf's base block.
fn leaf_bounds<S: Store + ?Sized>(
    store: &S,
    segment: &Segment,
    address: u32,
    table: &TableEntry,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let extent = segment.extent();
    let mut reader = StoreReader::new(store, extent.address(), extent.length() as u64);
    reader.seek(address as u64)?;

    let mut min_key = vec![0u8; table.key_length() as usize];
    reader.read_exact(&mut min_key)?;
    let mut max_key = vec![0u8; table.key_length() as usize];
    reader.read_exact(&mut max_key)?;

    Ok((min_key, max_key))
}

fn format_key(key: &[u8]) -> String {
    if key.len() <= 4 {
        hex::encode(key)
    } else {
        format!(
            "{}..{}",
            hex::encode(&key[..2]),
            hex::encode(&key[key.len() - 2..])
        )
    }
}
