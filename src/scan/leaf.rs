//! Leaf reconstruction: read a page's base row blocks, then replay its
//! delta runs in stored order to produce the final row set.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bits;
use crate::error::{Error, Result};
use crate::scan::segment::{Delta, Page};
use crate::scan::{TableEntry, LARGE_BLOB_MASK, ROW_CODE_MASK, ROW_INSERT, ROW_REMOVE, STATE_LENGTH};
use crate::store::{Store, StoreReader};

/// One reconstructed row: a shared buffer and the row's offset within it.
///
/// Blob indirection pairs inside the row reference the buffer from its
/// start, so the whole buffer travels with the row. Rows read from the same
/// base block share one buffer; delta rows own theirs.
#[derive(Debug, Clone)]
pub struct RowImage {
    data: Arc<[u8]>,
    offset: usize,
}

impl RowImage {
    /// The backing buffer: inline blob area first, row data after.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the row's first byte within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Reconstruct the final rows of one page, keyed by the row's key bytes.
///
/// The base snapshot is applied first, then each delta run in stored
/// order; an insert replaces any prior value for its key and a tombstone
/// deletes it. Any unrecognized tag aborts this page only.
pub fn reconstruct<S: Store + ?Sized>(
    store: &S,
    table: &TableEntry,
    page: &Page,
) -> Result<BTreeMap<Vec<u8>, RowImage>> {
    let mut rows = BTreeMap::new();

    read_base(store, table, page, &mut rows)?;

    for delta in page.deltas() {
        replay_delta(store, table, page, delta, &mut rows)?;
    }

    Ok(rows)
}

fn read_base<S: Store + ?Sized>(
    store: &S,
    table: &TableEntry,
    page: &Page,
    rows: &mut BTreeMap<Vec<u8>, RowImage>,
) -> Result<()> {
    let extent = page.extent();
    let mut reader = StoreReader::new(store, extent.address(), extent.length() as u64);
    reader.seek(page.address() as u64)?;

    // min/max key bounds: informational, not enforced.
    reader.skip(2 * table.key_length() as u64)?;

    let blocks = reader.read_u16()?;
    for _ in 0..blocks {
        read_base_block(&mut reader, table, page, rows)?;
    }

    Ok(())
}

/// One base row block: an inline blob area up front, then the row data
/// right-aligned behind it so fixed column offsets stay valid while blob
/// pairs keep referencing the buffer from its start.
fn read_base_block<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
    table: &TableEntry,
    page: &Page,
    rows: &mut BTreeMap<Vec<u8>, RowImage>,
) -> Result<()> {
    let blob_length = reader.read_u16()? as usize;
    let mut buffer = vec![0u8; blob_length];
    reader.read_exact(&mut buffer)?;

    let row_data_length = reader.read_u16()? as usize;
    let row_start = buffer.len();
    buffer.resize(blob_length + row_data_length, 0);
    reader.read_exact(&mut buffer[row_start..])?;

    let data: Arc<[u8]> = buffer.into();
    let row_length = table.row_length() as usize;
    let key_length = table.key_length() as usize;
    let remove_length = key_length + STATE_LENGTH;

    let mut offset = row_start;
    while offset < data.len() {
        let tag = data[offset] & ROW_CODE_MASK;
        match tag {
            ROW_INSERT => {
                let key_offset = offset + table.key_offset() as usize;
                if offset + row_length > data.len() {
                    return Err(Error::TruncatedRead {
                        position: offset as u64,
                        wanted: row_length,
                    });
                }
                let key = data[key_offset..key_offset + key_length].to_vec();
                rows.insert(key, RowImage { data: data.clone(), offset });
                offset += row_length;
            }
            ROW_REMOVE => {
                let key_offset = offset + STATE_LENGTH;
                if offset + remove_length > data.len() {
                    return Err(Error::TruncatedRead {
                        position: offset as u64,
                        wanted: remove_length,
                    });
                }
                rows.remove(&data[key_offset..key_offset + key_length]);
                offset += remove_length;
            }
            _ => return Err(Error::MalformedPage { pid: page.pid(), tag }),
        }
    }

    Ok(())
}

fn replay_delta<S: Store + ?Sized>(
    store: &S,
    table: &TableEntry,
    page: &Page,
    delta: &Delta,
    rows: &mut BTreeMap<Vec<u8>, RowImage>,
) -> Result<()> {
    let extent = page.extent();
    let mut reader = StoreReader::new(store, extent.address(), extent.length() as u64);
    reader.seek(delta.address() as u64)?;

    let end = delta.address() as u64 + delta.length() as u64;
    while reader.position() < end {
        replay_delta_op(&mut reader, table, page, rows)?;
    }

    Ok(())
}

fn replay_delta_op<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
    table: &TableEntry,
    page: &Page,
    rows: &mut BTreeMap<Vec<u8>, RowImage>,
) -> Result<()> {
    // The tag byte doubles as the first byte of the row's state header, so
    // peek: an insert re-reads it as part of the state column.
    let tag = reader.peek_u8()? & ROW_CODE_MASK;

    match tag {
        ROW_INSERT => {
            let (key, image) = read_delta_insert(reader, table, page)?;
            rows.insert(key, image);
        }
        ROW_REMOVE => {
            let mut record = vec![0u8; STATE_LENGTH + table.key_length() as usize];
            reader.read_exact(&mut record)?;
            rows.remove(&record[STATE_LENGTH..]);
        }
        _ => return Err(Error::MalformedDelta { pid: page.pid(), tag }),
    }

    Ok(())
}

/// Decode one delta insert into an owned row buffer.
///
/// Fixed-width columns are copied verbatim. Blob columns carry a u16
/// length followed by that many payload bytes; the payload moves to the
/// inline area at the front of the buffer and the column slot receives the
/// (offset, stored length) pair. A stored length with the high bit set
/// marks a large out-of-row blob: its flag is preserved so the cursor can
/// report it, never resolved here.
fn read_delta_insert<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
    table: &TableEntry,
    page: &Page,
) -> Result<(Vec<u8>, RowImage)> {
    let row_length = table.row_length() as usize;
    let mut row = vec![0u8; row_length];
    let mut blob_area: Vec<u8> = Vec::new();

    for column in table.schema().columns() {
        let offset = column.offset() as usize;

        if column.column_type().is_blob() {
            let stored_length = reader.read_u16()?;
            if stored_length != 0 {
                let payload_length = (stored_length & !LARGE_BLOB_MASK) as usize;
                let blob_offset = blob_area.len();
                blob_area.resize(blob_offset + payload_length, 0);
                reader.read_exact(&mut blob_area[blob_offset..])?;

                let blob_offset = u16::try_from(blob_offset)
                    .map_err(|_| Error::MalformedDelta { pid: page.pid(), tag: ROW_INSERT })?;
                bits::put_u16(&mut row, offset, blob_offset)?;
                bits::put_u16(&mut row, offset + 2, stored_length)?;
            } else {
                bits::put_u16(&mut row, offset, 0)?;
                bits::put_u16(&mut row, offset + 2, 0)?;
            }
        } else {
            reader.read_exact(&mut row[offset..offset + column.length() as usize])?;
        }
    }

    let key_offset = table.key_offset() as usize;
    let key = row[key_offset..key_offset + table.key_length() as usize].to_vec();

    let row_start = blob_area.len();
    blob_area.extend_from_slice(&row);

    Ok((key, RowImage { data: blob_area.into(), offset: row_start }))
}
