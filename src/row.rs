//! Read-only typed access to one reconstructed row.

use crate::bits;
use crate::error::{Error, Result};
use crate::scan::LARGE_BLOB_MASK;
use crate::schema::{Column, ColumnType, RowSchema};

/// Cursor over one row's raw bytes.
///
/// `buf` is the full backing buffer (inline blob area + row data) and
/// `offset` is the row's first byte within it; blob indirection pairs
/// reference the buffer from its start. The view never outlives the buffer
/// and never copies unless an accessor says so.
pub struct RowView<'a> {
    schema: &'a RowSchema,
    buf: &'a [u8],
    offset: usize,
}

impl<'a> RowView<'a> {
    pub fn new(schema: &'a RowSchema, buf: &'a [u8], offset: usize) -> Self {
        RowView { schema, buf, offset }
    }

    pub fn schema(&self) -> &RowSchema {
        self.schema
    }

    pub fn column_count(&self) -> usize {
        self.schema.columns().len()
    }

    /// Row version from the fixed state header.
    pub fn version(&self) -> Result<i64> {
        Ok(bits::get_u64(self.buf, self.offset + 4)? as i64)
    }

    /// Wall-clock milliseconds encoded in the version's upper bits.
    pub fn time(&self) -> Result<i64> {
        Ok((self.version()? >> 24) * 1000)
    }

    /// Row timeout in milliseconds, from the state word's low 24 bits.
    pub fn timeout(&self) -> Result<i64> {
        let state = bits::get_u32(self.buf, self.offset)?;
        Ok((state & 0xff_ffff) as i64 * 60_000)
    }

    pub fn get_int(&self, index: usize) -> Result<i32> {
        let column = self.schema.column(index)?;
        let offset = self.field_offset(column);

        match column.column_type() {
            ColumnType::Int8 => Ok(self.byte_at(offset)? as i32),
            ColumnType::Int16 => Ok(bits::get_u16(self.buf, offset)? as i32),
            ColumnType::Int32 => Ok(bits::get_u32(self.buf, offset)? as i32),
            _ => Err(mismatch(column, "get_int")),
        }
    }

    pub fn get_long(&self, index: usize) -> Result<i64> {
        let column = self.schema.column(index)?;
        let offset = self.field_offset(column);

        match column.column_type() {
            ColumnType::Int8 => Ok(self.byte_at(offset)? as i64),
            ColumnType::Int16 => Ok(bits::get_u16(self.buf, offset)? as i64),
            ColumnType::Int32 => Ok(bits::get_u32(self.buf, offset)? as i32 as i64),
            ColumnType::Int64 | ColumnType::Timestamp | ColumnType::Identity => {
                Ok(bits::get_u64(self.buf, offset)? as i64)
            }
            _ => Err(mismatch(column, "get_long")),
        }
    }

    pub fn get_double(&self, index: usize) -> Result<f64> {
        let column = self.schema.column(index)?;
        let offset = self.field_offset(column);

        match column.column_type() {
            ColumnType::Float => Ok(f32::from_bits(bits::get_u32(self.buf, offset)?) as f64),
            ColumnType::Double => Ok(f64::from_bits(bits::get_u64(self.buf, offset)?)),
            _ => Err(mismatch(column, "get_double")),
        }
    }

    pub fn get_boolean(&self, index: usize) -> Result<bool> {
        let column = self.schema.column(index)?;
        let offset = self.field_offset(column);

        match column.column_type() {
            ColumnType::Bool | ColumnType::Int8 => Ok(self.byte_at(offset)? != 0),
            _ => Err(mismatch(column, "get_boolean")),
        }
    }

    /// Raw storage bytes of a fixed-width column.
    pub fn get_bytes(&self, index: usize) -> Result<&'a [u8]> {
        let column = self.schema.column(index)?;
        if column.column_type().is_blob() {
            return Err(mismatch(column, "get_bytes"));
        }

        let offset = self.field_offset(column);
        let length = column.length() as usize;
        self.buf
            .get(offset..offset + length)
            .ok_or(Error::TruncatedRead { position: offset as u64, wanted: length })
    }

    /// Inline string payload of a STRING column.
    pub fn get_string(&self, index: usize) -> Result<&'a str> {
        let column = self.schema.column(index)?;
        if column.column_type() != ColumnType::String {
            return Err(mismatch(column, "get_string"));
        }

        let payload = self.blob_payload(column)?;
        std::str::from_utf8(payload)
            .map_err(|_| Error::InvalidString { column: column.name().to_string() })
    }

    /// Inline payload bytes of any blob-shaped column.
    pub fn get_blob(&self, index: usize) -> Result<&'a [u8]> {
        let column = self.schema.column(index)?;
        if !column.column_type().is_blob() {
            return Err(mismatch(column, "get_blob"));
        }

        self.blob_payload(column)
    }

    /// Stored payload length of a blob-shaped column.
    pub fn blob_len(&self, index: usize) -> Result<usize> {
        let column = self.schema.column(index)?;
        if !column.column_type().is_blob() {
            return Err(mismatch(column, "blob_len"));
        }

        let (blob_offset, stored_length) = self.blob_pair(column)?;
        if stored_length & LARGE_BLOB_MASK != 0 {
            return Err(Error::OversizedBlob { offset: blob_offset, length: stored_length });
        }
        Ok(stored_length as usize)
    }

    fn field_offset(&self, column: &Column) -> usize {
        self.offset + column.offset() as usize
    }

    fn byte_at(&self, offset: usize) -> Result<u8> {
        self.buf
            .get(offset)
            .copied()
            .ok_or(Error::TruncatedRead { position: offset as u64, wanted: 1 })
    }

    fn blob_pair(&self, column: &Column) -> Result<(u16, u16)> {
        let offset = self.field_offset(column);
        let blob_offset = bits::get_u16(self.buf, offset)?;
        let stored_length = bits::get_u16(self.buf, offset + 2)?;
        Ok((blob_offset, stored_length))
    }

    /// Resolve a blob indirection pair. A stored length carrying the
    /// large-blob flag is reported as unsupported, never truncated.
    fn blob_payload(&self, column: &Column) -> Result<&'a [u8]> {
        let (blob_offset, stored_length) = self.blob_pair(column)?;

        if stored_length & LARGE_BLOB_MASK != 0 {
            return Err(Error::OversizedBlob { offset: blob_offset, length: stored_length });
        }

        let start = blob_offset as usize;
        let length = stored_length as usize;
        self.buf
            .get(start..start + length)
            .ok_or(Error::TruncatedRead { position: start as u64, wanted: length })
    }
}

fn mismatch(column: &Column, requested: &'static str) -> Error {
    Error::TypeMismatch { column: column.name().to_string(), requested }
}
