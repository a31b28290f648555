//! v10 container scanning: the meta header, the table/segment meta stream,
//! per-segment page indexes, and leaf reconstruction.

pub mod leaf;
pub mod segment;

pub use leaf::{reconstruct, RowImage};
pub use segment::{index_segments, Delta, Page, PageType, Segment, SegmentExtent};

use tracing::{debug, warn};

use crate::bits::Crc32;
use crate::error::{Error, Result};
use crate::schema::RowSchema;
use crate::store::{Store, StoreReader};

/// 8-byte magic opening every v10 store file.
pub const KELP_MAGIC: u64 = u64::from_be_bytes(*b"Kelp1102");

/// The meta segment is a fixed region at address 0.
pub const META_SEGMENT_SIZE: u32 = 256 * 1024;

/// Meta-data records begin at this offset inside the meta segment.
pub const META_OFFSET: u64 = 1024;

/// Size of each segment's trailing index block.
pub const BLOCK_SIZE: usize = 8192;

/// Table identifiers are fixed-size opaque byte strings.
pub const TABLE_KEY_SIZE: usize = 32;

/// Offset of the index tail pointer within the trailing block.
pub const FOOTER_OFFSET: usize = BLOCK_SIZE - 8;

/// First index entry offset within the trailing block, after the block's
/// own sequence + table key header.
pub const INDEX_OFFSET: usize = TABLE_KEY_SIZE + 8;

/// Seed for the meta header CRC. Meta records are seeded from the nonce.
pub const HEADER_CRC_SEED: u32 = 17;

pub const CODE_TABLE: u8 = 0x1;
pub const CODE_SEGMENT: u8 = 0x2;
pub const CODE_META_CONTINUATION: u8 = 0x3;

/// Row tag bits; the low six bits of the leading state byte are flags.
pub const ROW_CODE_MASK: u8 = 0xc0;
pub const ROW_INSERT: u8 = 0x40;
pub const ROW_REMOVE: u8 = 0x80;

/// Fixed state+version header at the front of every row and tombstone.
pub const STATE_LENGTH: usize = 12;

/// High bit of a stored blob length, flagging an out-of-row "large" blob.
pub const LARGE_BLOB_MASK: u16 = 0x8000;

/// Opaque 32-byte table identifier.
pub type TableKey = [u8; TABLE_KEY_SIZE];

/// True if `magic` names a store version this scanner understands.
pub fn is_version_supported(magic: u64) -> bool {
    magic == KELP_MAGIC
}

/// Short hex prefix of a table key for log lines and dumps.
pub(crate) fn short_key(key: &TableKey) -> String {
    hex::encode(&key[..4])
}

/// One table discovered in the meta stream.
#[derive(Debug, Clone)]
pub struct TableEntry {
    key: TableKey,
    row_length: u16,
    key_offset: u16,
    key_length: u16,
    schema: RowSchema,
}

impl TableEntry {
    pub(crate) fn new(
        key: TableKey,
        row_length: u16,
        key_offset: u16,
        key_length: u16,
        schema: RowSchema,
    ) -> Self {
        TableEntry { key, row_length, key_offset, key_length, schema }
    }

    pub fn key(&self) -> &TableKey {
        &self.key
    }

    pub fn row_length(&self) -> u16 {
        self.row_length
    }

    pub fn key_offset(&self) -> u16 {
        self.key_offset
    }

    pub fn key_length(&self) -> u16 {
        self.key_length
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }
}

/// Parsed view of a store's meta segment: every table and every finalized
/// data segment the meta stream describes.
pub struct Container {
    nonce: u32,
    segment_sizes: Vec<u32>,
    tables: Vec<TableEntry>,
    segments: Vec<Segment>,
}

impl Container {
    /// Scan the meta header and meta-data stream of a closed store.
    ///
    /// A bad magic or a header CRC mismatch fails the whole scan. Damage
    /// inside the meta stream is scoped to the affected record: it is
    /// logged and skipped, and scanning continues.
    pub fn open<S: Store + ?Sized>(store: &S) -> Result<Container> {
        let mut reader = StoreReader::new(store, 0, META_SEGMENT_SIZE as u64);

        let (nonce, segment_sizes) = read_meta_header(&mut reader)?;
        let (tables, extents) = read_meta_data(&mut reader, nonce)?;
        let segments = read_segment_headers(store, extents);

        debug!(
            tables = tables.len(),
            segments = segments.len(),
            "container scan complete"
        );

        Ok(Container { nonce, segment_sizes, tables, segments })
    }

    /// CRC seed stamped into this store at creation.
    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// Declared segment sizes from the header. Informational.
    pub fn segment_sizes(&self) -> &[u32] {
        &self.segment_sizes
    }

    pub fn tables(&self) -> &[TableEntry] {
        &self.tables
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segments owned by one table, in meta-stream order.
    pub fn table_segments(&self, key: &TableKey) -> Vec<&Segment> {
        self.segments.iter().filter(|s| s.table_key() == key).collect()
    }
}

fn read_meta_header<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
) -> Result<(u32, Vec<u32>)> {
    let magic = reader.read_u64()?;
    if magic != KELP_MAGIC {
        return Err(Error::UnknownVersion(magic));
    }

    let mut crc = Crc32::seeded(HEADER_CRC_SEED);
    crc.update_u64(magic);

    let nonce = reader.read_u32()?;
    crc.update_u32(nonce);

    // Forward-compatible (key, value) extension slots; unused here but
    // still covered by the header CRC.
    let header_count = reader.read_u32()?;
    crc.update_u32(header_count);
    for _ in 0..header_count {
        let key = reader.read_u32()?;
        crc.update_u32(key);
        let value = reader.read_u32()?;
        crc.update_u32(value);
    }

    let size_count = reader.read_u32()?;
    crc.update_u32(size_count);
    let mut segment_sizes = Vec::with_capacity(size_count.min(1024) as usize);
    for _ in 0..size_count {
        let size = reader.read_u32()?;
        crc.update_u32(size);
        segment_sizes.push(size);
    }

    let stored = reader.read_u32()?;
    let computed = crc.value();
    if stored != computed {
        return Err(Error::CorruptHeader { expected: computed, actual: stored });
    }

    Ok((nonce, segment_sizes))
}

fn read_meta_data<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
    nonce: u32,
) -> Result<(Vec<TableEntry>, Vec<SegmentExtent>)> {
    reader.seek(META_OFFSET)?;

    let mut tables = Vec::new();
    let mut extents = Vec::new();
    // The meta segment itself is extent 0.
    let mut next_segment_id = 1u32;

    loop {
        let record_offset = reader.position();
        let code = match reader.read_u8() {
            Ok(code) => code,
            Err(_) => break,
        };

        let outcome = match code {
            CODE_TABLE => read_meta_table(reader, nonce, record_offset),
            CODE_SEGMENT => {
                read_meta_segment(reader, nonce, record_offset, &mut next_segment_id)
            }
            CODE_META_CONTINUATION => {
                // Present in the record-code space, but no writer ever
                // produced one and its layout is unknown. Never guessed.
                warn!(
                    offset = record_offset,
                    "meta continuation record is not supported; ending meta scan"
                );
                break;
            }
            _ => break,
        };

        match outcome {
            Ok(Some(MetaRecord::Table(entry))) => tables.push(entry),
            Ok(Some(MetaRecord::Segment(extent))) => extents.push(extent),
            Ok(None) => {} // damaged or skipped record, keep scanning
            Err(Error::TruncatedRead { .. }) => {
                warn!(
                    offset = record_offset,
                    "meta record runs past the meta segment; ending meta scan"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok((tables, extents))
}

enum MetaRecord {
    Table(TableEntry),
    Segment(SegmentExtent),
}

fn read_meta_table<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
    nonce: u32,
    record_offset: u64,
) -> Result<Option<MetaRecord>> {
    let mut crc = Crc32::seeded(nonce);
    crc.update_u8(CODE_TABLE);

    let mut key: TableKey = [0; TABLE_KEY_SIZE];
    reader.read_exact(&mut key)?;
    crc.update(&key);

    let row_length = reader.read_u16()?;
    crc.update_u16(row_length);
    let key_offset = reader.read_u16()?;
    crc.update_u16(key_offset);
    let key_length = reader.read_u16()?;
    crc.update_u16(key_length);

    let data_length = reader.read_u16()?;
    crc.update_u16(data_length);
    let mut data = vec![0u8; data_length as usize];
    reader.read_exact(&mut data)?;
    crc.update(&data);

    let stored = reader.read_u32()?;
    if stored != crc.value() {
        let err = Error::CorruptMetaRecord { code: CODE_TABLE, offset: record_offset };
        warn!(error = %err, "skipping damaged table record");
        return Ok(None);
    }

    let schema = match RowSchema::decode(&data, key_offset, key_length) {
        Ok(schema) => schema,
        Err(e) => {
            warn!(
                table = %short_key(&key),
                error = %e,
                "skipping table with undecodable schema"
            );
            return Ok(None);
        }
    };

    if schema.row_length() != row_length {
        warn!(
            table = %schema.name(),
            schema_length = schema.row_length(),
            row_length,
            "skipping table whose schema does not span its row length"
        );
        return Ok(None);
    }

    if key_offset as u32 + key_length as u32 > row_length as u32 {
        warn!(
            table = %schema.name(),
            key_offset,
            key_length,
            row_length,
            "skipping table whose key range exceeds its row length"
        );
        return Ok(None);
    }

    Ok(Some(MetaRecord::Table(TableEntry::new(
        key, row_length, key_offset, key_length, schema,
    ))))
}

fn read_meta_segment<S: Store + ?Sized>(
    reader: &mut StoreReader<'_, S>,
    nonce: u32,
    record_offset: u64,
    next_segment_id: &mut u32,
) -> Result<Option<MetaRecord>> {
    let mut crc = Crc32::seeded(nonce);
    crc.update_u8(CODE_SEGMENT);

    let value = reader.read_u64()?;
    crc.update_u64(value);

    let stored = reader.read_u32()?;
    if stored != crc.value() {
        let err = Error::CorruptMetaRecord { code: CODE_SEGMENT, offset: record_offset };
        warn!(error = %err, "skipping damaged segment record");
        return Ok(None);
    }

    // Segments are 64 KiB-granular: the packed value carries the address in
    // its high bits and the length, divided down, in the low 16.
    let address = value & !0xffff;
    let length = ((value & 0xffff) << 16) as u32;

    let id = *next_segment_id;
    *next_segment_id += 1;

    Ok(Some(MetaRecord::Segment(SegmentExtent::new(id, address, length))))
}

/// Read each extent's trailing sequence + table key and keep the segments
/// that were actually finalized.
fn read_segment_headers<S: Store + ?Sized>(
    store: &S,
    extents: Vec<SegmentExtent>,
) -> Vec<Segment> {
    let mut segments = Vec::new();

    for extent in extents {
        match segment::read_segment_header(store, extent) {
            Ok(Some(segment)) => segments.push(segment),
            Ok(None) => {
                debug!(segment = extent.id(), "excluding never-finalized segment");
            }
            Err(e) => {
                warn!(
                    segment = extent.id(),
                    error = %e,
                    "skipping unreadable segment"
                );
            }
        }
    }

    segments
}
