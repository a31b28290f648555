//! Segment footers and the per-segment page index.
//!
//! Each data segment ends with a fixed-size block: its own sequence and
//! table key up front, then the index entries cataloging every page the
//! segment holds, then a tail pointer in the footer.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bits;
use crate::error::{Error, Result};
use crate::scan::{TableKey, BLOCK_SIZE, FOOTER_OFFSET, INDEX_OFFSET, TABLE_KEY_SIZE};
use crate::store::{Store, StoreReader};

/// A contiguous byte range of the store holding one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentExtent {
    id: u32,
    address: u64,
    length: u32,
}

impl SegmentExtent {
    pub fn new(id: u32, address: u64, length: u32) -> Self {
        SegmentExtent { id, address, length }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

/// A finalized segment: extent plus the sequence and owning table stamped
/// into its trailing block at write time.
#[derive(Debug, Clone)]
pub struct Segment {
    extent: SegmentExtent,
    sequence: u64,
    table_key: TableKey,
}

impl Segment {
    pub fn extent(&self) -> &SegmentExtent {
        &self.extent
    }

    /// Monotonic write order; ownership of a page id is decided by
    /// comparing sequences, never addresses.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn table_key(&self) -> &TableKey {
        &self.table_key
    }
}

/// Page type codes as stored in segment index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    None,
    Tree,
    Leaf,
    LeafDelta,
    BlobTemp,
    Blob,
    BlobFree,
}

impl PageType {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(PageType::None),
            1 => Some(PageType::Tree),
            2 => Some(PageType::Leaf),
            3 => Some(PageType::LeafDelta),
            4 => Some(PageType::BlobTemp),
            5 => Some(PageType::Blob),
            6 => Some(PageType::BlobFree),
            _ => None,
        }
    }
}

/// A run of delta-encoded operations appended after a leaf's base snapshot.
/// Addresses are relative to the owning segment.
#[derive(Debug, Clone, Copy)]
pub struct Delta {
    address: u32,
    length: u32,
}

impl Delta {
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

/// The surviving version of one leaf page: where its base row block lives,
/// which segment owns it, and the delta runs layered on top.
#[derive(Debug, Clone)]
pub struct Page {
    pid: u32,
    next_pid: u32,
    extent: SegmentExtent,
    sequence: u64,
    address: u32,
    length: u32,
    deltas: Vec<Delta>,
}

impl Page {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn next_pid(&self) -> u32 {
        self.next_pid
    }

    /// Extent of the segment this page version was read from.
    pub fn extent(&self) -> &SegmentExtent {
        &self.extent
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Segment-relative address of the base row block.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Delta runs in stored order.
    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }
}

/// One parsed index entry from a segment's trailing block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexEntry {
    pub page_type: PageType,
    pub pid: u32,
    pub next_pid: u32,
    pub address: u32,
    pub length: u32,
}

/// Read a segment's trailing sequence + table key.
///
/// Returns `None` for a segment whose sequence is zero: it was allocated
/// but never finalized, and nothing in it can be trusted.
pub(crate) fn read_segment_header<S: Store + ?Sized>(
    store: &S,
    extent: SegmentExtent,
) -> Result<Option<Segment>> {
    if (extent.length() as usize) < BLOCK_SIZE {
        return Err(Error::UnindexableSegment {
            segment: extent.id(),
            reason: format!("segment length {} is smaller than one block", extent.length()),
        });
    }

    match extent.address().checked_add(extent.length() as u64) {
        Some(end) if end <= store.len() => {}
        _ => {
            return Err(Error::UnindexableSegment {
                segment: extent.id(),
                reason: format!(
                    "extent 0x{:x}+0x{:x} extends past the store",
                    extent.address(),
                    extent.length()
                ),
            });
        }
    }

    let mut reader = StoreReader::new(store, extent.address(), extent.length() as u64);
    reader.seek(extent.length() as u64 - BLOCK_SIZE as u64)?;

    let sequence = reader.read_u64()?;
    let mut table_key: TableKey = [0; TABLE_KEY_SIZE];
    reader.read_exact(&mut table_key)?;

    if sequence == 0 {
        return Ok(None);
    }

    Ok(Some(Segment { extent, sequence, table_key }))
}

/// Parse every index entry in a segment's trailing block.
pub(crate) fn read_index_entries<S: Store + ?Sized>(
    store: &S,
    segment: &Segment,
) -> Result<Vec<IndexEntry>> {
    let extent = segment.extent();
    let block_address = extent.address() + extent.length() as u64 - BLOCK_SIZE as u64;

    let mut block = vec![0u8; BLOCK_SIZE];
    store.read_at(block_address, &mut block)?;

    let tail = bits::get_u16(&block, FOOTER_OFFSET)? as usize;
    if !(INDEX_OFFSET..FOOTER_OFFSET).contains(&tail) {
        return Err(Error::UnindexableSegment {
            segment: extent.id(),
            reason: format!("index tail {} out of range", tail),
        });
    }

    let mut entries = Vec::new();
    let mut offset = INDEX_OFFSET;

    while offset < tail {
        let raw_type = block[offset];
        offset += 1;
        let pid = bits::get_u32(&block, offset)?;
        offset += 4;
        let next_pid = bits::get_u32(&block, offset)?;
        offset += 4;
        let address = bits::get_u32(&block, offset)?;
        offset += 4;
        let length = bits::get_u32(&block, offset)?;
        offset += 4;

        // pids 0 and 1 are reserved; finding one means the index is junk.
        if pid <= 1 {
            return Err(Error::UnindexableSegment {
                segment: extent.id(),
                reason: format!("reserved pid {}", pid),
            });
        }

        let page_type = PageType::from_u8(raw_type).ok_or_else(|| Error::UnindexableSegment {
            segment: extent.id(),
            reason: format!("unknown page type 0x{:02x}", raw_type),
        })?;

        entries.push(IndexEntry { page_type, pid, next_pid, address, length });
    }

    Ok(entries)
}

/// Build the page map for one table from its segments.
///
/// Segments are processed newest-sequence-first, so the first LEAF entry
/// seen for a pid is the surviving one and superseded segments never have
/// their data blocks read. A segment whose index cannot be trusted is
/// skipped; the rest of the table is still indexed.
pub fn index_segments<S: Store + ?Sized>(
    store: &S,
    segments: &[&Segment],
) -> BTreeMap<u32, Page> {
    let mut ordered: Vec<&Segment> = segments.to_vec();
    ordered.sort_by(|a, b| b.sequence().cmp(&a.sequence()));

    let mut pages = BTreeMap::new();

    for segment in ordered {
        if let Err(e) = index_segment(store, segment, &mut pages) {
            warn!(
                segment = segment.extent().id(),
                error = %e,
                "skipping unindexable segment"
            );
        }
    }

    pages
}

fn index_segment<S: Store + ?Sized>(
    store: &S,
    segment: &Segment,
    pages: &mut BTreeMap<u32, Page>,
) -> Result<()> {
    for entry in read_index_entries(store, segment)? {
        match entry.page_type {
            PageType::Leaf => add_leaf(pages, segment, &entry),
            PageType::LeafDelta => add_leaf_delta(pages, segment, &entry),
            other => {
                debug!(
                    segment = segment.extent().id(),
                    pid = entry.pid,
                    page_type = ?other,
                    "ignoring index entry"
                );
            }
        }
    }

    Ok(())
}

/// Latest sequence wins; on a tie the entry seen first (from the segment
/// processed first) is kept.
fn add_leaf(pages: &mut BTreeMap<u32, Page>, segment: &Segment, entry: &IndexEntry) {
    if let Some(existing) = pages.get(&entry.pid) {
        if existing.sequence > segment.sequence() {
            return;
        }
    }

    pages.insert(
        entry.pid,
        Page {
            pid: entry.pid,
            next_pid: entry.next_pid,
            extent: *segment.extent(),
            sequence: segment.sequence(),
            address: entry.address,
            length: entry.length,
            deltas: Vec::new(),
        },
    );
}

/// A delta only matters if the page version it extends is the surviving
/// one; deltas for superseded page versions are discarded unread.
fn add_leaf_delta(pages: &mut BTreeMap<u32, Page>, segment: &Segment, entry: &IndexEntry) {
    if let Some(page) = pages.get_mut(&entry.pid) {
        if page.sequence <= segment.sequence() {
            page.deltas.push(Delta { address: entry.address, length: entry.length });
        }
    }
}
