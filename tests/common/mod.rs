#![allow(dead_code)]

//! Builds byte-exact v10 store images for integration tests: meta header,
//! CRC-sealed table/segment records, 64 KiB segments with trailing index
//! blocks, leaf base blocks and delta runs.

use kelpscan::bits::Crc32;
use kelpscan::scan::{
    BLOCK_SIZE, CODE_META_CONTINUATION, CODE_SEGMENT, CODE_TABLE, FOOTER_OFFSET,
    HEADER_CRC_SEED, INDEX_OFFSET, KELP_MAGIC, META_OFFSET, META_SEGMENT_SIZE, ROW_INSERT,
    ROW_REMOVE, STATE_LENGTH, TABLE_KEY_SIZE,
};

/// Every test segment is a single 64 KiB granule.
pub const SEG_LEN: u32 = 64 * 1024;

/// The standard test table: state(12) + id int64 key + value string.
pub const ITEM_ROW_LEN: u16 = 24;
pub const ITEM_KEY_OFFSET: u16 = 12;
pub const ITEM_KEY_LEN: u16 = 8;

fn push_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

/// Serialized schema bytes for the standard test table.
pub fn item_schema_bytes(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    push_string(&mut out, name);
    out.extend_from_slice(&1u16.to_be_bytes()); // key column start
    out.extend_from_slice(&2u16.to_be_bytes()); // key column end

    out.extend_from_slice(&3u16.to_be_bytes());
    for (type_code, length, column) in [(0u16, 12u16, ":state"), (7, 8, "id"), (14, 4, "value")]
    {
        out.extend_from_slice(&type_code.to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        push_string(&mut out, column);
    }

    out.extend_from_slice(&0u16.to_be_bytes()); // legacy blob descriptors
    out.extend_from_slice(&0u16.to_be_bytes()); // properties
    out
}

/// Rows of one leaf base block for the standard test table.
#[derive(Default)]
pub struct LeafData {
    blob: Vec<u8>,
    rows: Vec<u8>,
}

impl LeafData {
    pub fn new() -> Self {
        LeafData::default()
    }

    pub fn insert(&mut self, id: u64, value: &str) -> &mut Self {
        let blob_offset = self.blob.len() as u16;
        self.blob.extend_from_slice(value.as_bytes());

        let mut row = vec![0u8; ITEM_ROW_LEN as usize];
        row[0] = ROW_INSERT;
        row[4..12].copy_from_slice(&1u64.to_be_bytes()); // version
        row[12..20].copy_from_slice(&id.to_be_bytes());
        row[20..22].copy_from_slice(&blob_offset.to_be_bytes());
        row[22..24].copy_from_slice(&(value.len() as u16).to_be_bytes());
        self.rows.extend_from_slice(&row);
        self
    }

    pub fn remove(&mut self, id: u64) -> &mut Self {
        let mut tombstone = vec![0u8; STATE_LENGTH];
        tombstone[0] = ROW_REMOVE;
        tombstone.extend_from_slice(&id.to_be_bytes());
        self.rows.extend_from_slice(&tombstone);
        self
    }

    /// Push an arbitrary tag byte to poison the row stream.
    pub fn raw_tag(&mut self, tag: u8) -> &mut Self {
        self.rows.push(tag);
        self
    }

    /// Encode as a page base: min/max key bounds, block count, one block.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0u8; 2 * ITEM_KEY_LEN as usize]);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(self.blob.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.blob);
        out.extend_from_slice(&(self.rows.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rows);
        out
    }
}

/// Delta insert op for the standard test table.
pub fn delta_insert(id: u64, value: &str) -> Vec<u8> {
    let mut op = Vec::new();
    op.push(ROW_INSERT);
    op.extend_from_slice(&[0u8; 3]);
    op.extend_from_slice(&2u64.to_be_bytes()); // version
    op.extend_from_slice(&id.to_be_bytes());
    op.extend_from_slice(&(value.len() as u16).to_be_bytes());
    op.extend_from_slice(value.as_bytes());
    op
}

/// Delta insert whose string length carries the large-blob flag; `inline`
/// is the payload that still sits inline.
pub fn delta_insert_large(id: u64, inline: &str) -> Vec<u8> {
    let mut op = Vec::new();
    op.push(ROW_INSERT);
    op.extend_from_slice(&[0u8; 3]);
    op.extend_from_slice(&2u64.to_be_bytes());
    op.extend_from_slice(&id.to_be_bytes());
    op.extend_from_slice(&(0x8000u16 | inline.len() as u16).to_be_bytes());
    op.extend_from_slice(inline.as_bytes());
    op
}

pub fn delta_remove(id: u64) -> Vec<u8> {
    let mut op = Vec::new();
    op.push(ROW_REMOVE);
    op.extend_from_slice(&[0u8; STATE_LENGTH - 1]);
    op.extend_from_slice(&id.to_be_bytes());
    op
}

/// One data segment under construction.
pub struct SegmentImage {
    sequence: u64,
    table_key: [u8; TABLE_KEY_SIZE],
    buf: Vec<u8>,
    data_offset: usize,
    entries: Vec<(u8, u32, u32, u32, u32)>,
}

impl SegmentImage {
    pub fn new(sequence: u64, table_key: [u8; TABLE_KEY_SIZE]) -> Self {
        SegmentImage {
            sequence,
            table_key,
            buf: vec![0u8; SEG_LEN as usize],
            data_offset: 0,
            entries: Vec::new(),
        }
    }

    pub fn leaf(&mut self, pid: u32, data: &LeafData) -> &mut Self {
        let encoded = data.encode();
        let address = self.push_data(&encoded);
        self.entries.push((2, pid, 0, address, encoded.len() as u32));
        self
    }

    pub fn delta(&mut self, pid: u32, ops: &[u8]) -> &mut Self {
        let address = self.push_data(ops);
        self.entries.push((3, pid, 0, address, ops.len() as u32));
        self
    }

    /// Append a raw index entry without backing data.
    pub fn index_entry(&mut self, entry: (u8, u32, u32, u32, u32)) -> &mut Self {
        self.entries.push(entry);
        self
    }

    fn push_data(&mut self, data: &[u8]) -> u32 {
        let address = self.data_offset as u32;
        self.buf[self.data_offset..self.data_offset + data.len()].copy_from_slice(data);
        self.data_offset += data.len();
        address
    }

    fn finish(mut self) -> Vec<u8> {
        let block = SEG_LEN as usize - BLOCK_SIZE;

        self.buf[block..block + 8].copy_from_slice(&self.sequence.to_be_bytes());
        self.buf[block + 8..block + 8 + TABLE_KEY_SIZE].copy_from_slice(&self.table_key);

        let mut offset = block + INDEX_OFFSET;
        for (page_type, pid, next_pid, address, length) in &self.entries {
            self.buf[offset] = *page_type;
            self.buf[offset + 1..offset + 5].copy_from_slice(&pid.to_be_bytes());
            self.buf[offset + 5..offset + 9].copy_from_slice(&next_pid.to_be_bytes());
            self.buf[offset + 9..offset + 13].copy_from_slice(&address.to_be_bytes());
            self.buf[offset + 13..offset + 17].copy_from_slice(&length.to_be_bytes());
            offset += 17;
        }

        let tail = (offset - block) as u16;
        self.buf[block + FOOTER_OFFSET..block + FOOTER_OFFSET + 2]
            .copy_from_slice(&tail.to_be_bytes());

        self.buf
    }
}

/// Assembles a complete store image: meta header, meta records, segments.
pub struct StoreImage {
    nonce: u32,
    meta_records: Vec<u8>,
    data: Vec<u8>,
}

impl StoreImage {
    pub fn new(nonce: u32) -> Self {
        StoreImage { nonce, meta_records: Vec::new(), data: Vec::new() }
    }

    pub fn table(&mut self, key: [u8; TABLE_KEY_SIZE], name: &str) -> &mut Self {
        let schema = item_schema_bytes(name);
        self.push_table_record(key, ITEM_ROW_LEN, ITEM_KEY_OFFSET, ITEM_KEY_LEN, &schema, false);
        self
    }

    /// A table record whose payload is bit-flipped after its CRC is sealed.
    pub fn corrupt_table(&mut self, key: [u8; TABLE_KEY_SIZE], name: &str) -> &mut Self {
        let schema = item_schema_bytes(name);
        self.push_table_record(key, ITEM_ROW_LEN, ITEM_KEY_OFFSET, ITEM_KEY_LEN, &schema, true);
        self
    }

    /// A table record with explicit geometry and schema bytes.
    pub fn table_raw(
        &mut self,
        key: [u8; TABLE_KEY_SIZE],
        row_length: u16,
        key_offset: u16,
        key_length: u16,
        schema: &[u8],
    ) -> &mut Self {
        self.push_table_record(key, row_length, key_offset, key_length, schema, false);
        self
    }

    pub fn segment(&mut self, segment: SegmentImage) -> &mut Self {
        self.push_segment(segment, false)
    }

    /// A bare continuation record; the legacy writer never produced one.
    pub fn meta_continuation(&mut self) -> &mut Self {
        self.meta_records.push(CODE_META_CONTINUATION);
        self
    }

    /// A segment whose meta record fails its CRC; its data is still laid
    /// out so only the record's fate decides whether it is scanned.
    pub fn corrupt_segment(&mut self, segment: SegmentImage) -> &mut Self {
        self.push_segment(segment, true)
    }

    fn push_table_record(
        &mut self,
        key: [u8; TABLE_KEY_SIZE],
        row_length: u16,
        key_offset: u16,
        key_length: u16,
        schema: &[u8],
        corrupt: bool,
    ) {
        let mut record = Vec::new();
        record.push(CODE_TABLE);
        record.extend_from_slice(&key);
        record.extend_from_slice(&row_length.to_be_bytes());
        record.extend_from_slice(&key_offset.to_be_bytes());
        record.extend_from_slice(&key_length.to_be_bytes());
        record.extend_from_slice(&(schema.len() as u16).to_be_bytes());
        record.extend_from_slice(schema);

        let mut crc = Crc32::seeded(self.nonce);
        crc.update(&record);
        let value = crc.value();

        if corrupt {
            let last = record.len() - 1;
            record[last] ^= 0x01;
        }

        record.extend_from_slice(&value.to_be_bytes());
        self.meta_records.extend_from_slice(&record);
    }

    fn push_segment(&mut self, segment: SegmentImage, corrupt: bool) -> &mut Self {
        let address = META_SEGMENT_SIZE as u64 + self.data.len() as u64;
        let packed = address | (SEG_LEN as u64 >> 16);

        let mut record = Vec::new();
        record.push(CODE_SEGMENT);
        record.extend_from_slice(&packed.to_be_bytes());

        let mut crc = Crc32::seeded(self.nonce);
        crc.update(&record);
        let value = crc.value();

        if corrupt {
            let last = record.len() - 1;
            record[last] ^= 0x01;
        }

        record.extend_from_slice(&value.to_be_bytes());
        self.meta_records.extend_from_slice(&record);

        self.data.extend_from_slice(&segment.finish());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; META_SEGMENT_SIZE as usize];

        let mut header = Vec::new();
        header.extend_from_slice(&KELP_MAGIC.to_be_bytes());
        header.extend_from_slice(&self.nonce.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes()); // header pairs
        header.extend_from_slice(&1u32.to_be_bytes()); // segment size count
        header.extend_from_slice(&SEG_LEN.to_be_bytes());

        let mut crc = Crc32::seeded(HEADER_CRC_SEED);
        crc.update(&header);
        header.extend_from_slice(&crc.value().to_be_bytes());

        image[..header.len()].copy_from_slice(&header);
        image[META_OFFSET as usize..META_OFFSET as usize + self.meta_records.len()]
            .copy_from_slice(&self.meta_records);
        image.extend_from_slice(&self.data);
        image
    }
}
