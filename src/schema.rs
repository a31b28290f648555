//! Table row layout: column descriptors, the row schema, and the decoder
//! for the schema's legacy binary encoding.

use crate::bits;
use crate::error::{Error, Result};

/// Column type codes as stored on disk.
///
/// `KeyStart`/`KeyEnd` exist only in the serialization's code space; they
/// never describe a real column. Blob-shaped types (`Blob`, `String`,
/// `Object`) store a 4-byte (offset, length) indirection pair in the row
/// buffer instead of inline data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    State,
    KeyStart,
    KeyEnd,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Timestamp,
    Identity,
    Bytes,
    Blob,
    String,
    Object,
}

impl ColumnType {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(ColumnType::State),
            1 => Some(ColumnType::KeyStart),
            2 => Some(ColumnType::KeyEnd),
            3 => Some(ColumnType::Bool),
            4 => Some(ColumnType::Int8),
            5 => Some(ColumnType::Int16),
            6 => Some(ColumnType::Int32),
            7 => Some(ColumnType::Int64),
            8 => Some(ColumnType::Float),
            9 => Some(ColumnType::Double),
            10 => Some(ColumnType::Timestamp),
            11 => Some(ColumnType::Identity),
            12 => Some(ColumnType::Bytes),
            13 => Some(ColumnType::Blob),
            14 => Some(ColumnType::String),
            15 => Some(ColumnType::Object),
            _ => None,
        }
    }

    /// True for columns whose row slot is an indirection pair.
    pub fn is_blob(self) -> bool {
        matches!(self, ColumnType::Blob | ColumnType::String | ColumnType::Object)
    }
}

/// One column of a table's fixed row layout.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    offset: u16,
    length: u16,
    is_key: bool,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Byte offset of this column within a row buffer.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Bytes this column occupies in the fixed row buffer. For blob-shaped
    /// columns this is the 4-byte indirection pair, not the payload size.
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }
}

/// Class/field binding carried alongside a schema.
///
/// The legacy format attached these so rows could be mapped back onto
/// application objects. This core only reports the names; any object
/// construction is the upgrade callback's business.
#[derive(Debug, Clone)]
pub struct ObjectScheme {
    class_name: String,
    field_names: Vec<String>,
}

impl ObjectScheme {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

/// A table's decoded row layout. Immutable once built.
#[derive(Debug, Clone)]
pub struct RowSchema {
    name: String,
    columns: Vec<Column>,
    schemes: Vec<ObjectScheme>,
    row_length: u16,
}

impl RowSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Result<&Column> {
        self.columns.get(index).ok_or(Error::NoSuchColumn(index))
    }

    pub fn schemes(&self) -> &[ObjectScheme] {
        &self.schemes
    }

    /// Total fixed row length in bytes, the sum of all column lengths.
    pub fn row_length(&self) -> u16 {
        self.row_length
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Decode a schema from its legacy binary encoding.
    ///
    /// Column offsets are not stored; columns are laid out contiguously in
    /// declaration order and the decoder accumulates the running offset.
    /// Key membership is derived from the table's key byte range.
    pub fn decode(data: &[u8], key_offset: u16, key_length: u16) -> Result<RowSchema> {
        let mut reader = SchemaReader { data, position: 0 };

        let name = reader.read_string()?;
        // Key column start/end markers, carried for compatibility.
        let _key_column_start = reader.read_u16()?;
        let _key_column_end = reader.read_u16()?;

        let mut builder = SchemaBuilder::new(name);

        let column_count = reader.read_u16()?;
        for _ in 0..column_count {
            let type_code = reader.read_u16()?;
            let length = reader.read_u16()?;
            let column_name = reader.read_string()?;

            let column_type = ColumnType::from_u16(type_code).ok_or_else(|| {
                Error::SchemaDecode(format!(
                    "unknown column type code {} for column {:?}",
                    type_code, column_name
                ))
            })?;

            builder.column(column_name, column_type, length, key_offset, key_length)?;
        }

        // Legacy out-of-row blob descriptors, superseded by the inline
        // BLOB/STRING/OBJECT column types. Read and discarded.
        let blob_count = reader.read_u16()?;
        for _ in 0..blob_count {
            let _type_code = reader.read_u16()?;
            let _length = reader.read_u16()?;
            let _name = reader.read_string()?;
        }

        let prop_count = reader.read_u16()?;
        for _ in 0..prop_count {
            let prop_name = reader.read_string()?;
            match prop_name.as_str() {
                "class" => {
                    let class_name = reader.read_string()?;
                    let field_count = reader.read_u16()?;
                    let mut field_names = Vec::with_capacity(field_count as usize);
                    for _ in 0..field_count {
                        field_names.push(reader.read_string()?);
                    }
                    builder.scheme(class_name, field_names);
                }
                other => {
                    return Err(Error::SchemaDecode(format!(
                        "unsupported schema property {:?}",
                        other
                    )));
                }
            }
        }

        Ok(builder.build())
    }
}

/// Builds a `RowSchema`, tracking the cumulative row length.
pub struct SchemaBuilder {
    name: String,
    columns: Vec<Column>,
    schemes: Vec<ObjectScheme>,
    row_length: u16,
}

impl SchemaBuilder {
    pub fn new(name: String) -> Self {
        SchemaBuilder {
            name,
            columns: Vec::new(),
            schemes: Vec::new(),
            row_length: 0,
        }
    }

    /// Append a column at the current end of the row.
    pub fn column(
        &mut self,
        name: String,
        column_type: ColumnType,
        length: u16,
        key_offset: u16,
        key_length: u16,
    ) -> Result<&mut Self> {
        if column_type.is_blob() && length != 4 {
            return Err(Error::SchemaDecode(format!(
                "blob column {:?} declares length {}, expected the 4-byte indirection pair",
                name, length
            )));
        }

        let offset = self.row_length;
        let is_key = key_offset <= offset && offset < key_offset.saturating_add(key_length);

        self.row_length = offset.checked_add(length).ok_or_else(|| {
            Error::SchemaDecode(format!("row length overflow adding column {:?}", name))
        })?;

        self.columns.push(Column { name, column_type, offset, length, is_key });
        Ok(self)
    }

    pub fn scheme(&mut self, class_name: String, field_names: Vec<String>) -> &mut Self {
        self.schemes.push(ObjectScheme { class_name, field_names });
        self
    }

    pub fn build(self) -> RowSchema {
        RowSchema {
            name: self.name,
            columns: self.columns,
            schemes: self.schemes,
            row_length: self.row_length,
        }
    }
}

/// Cursor over the serialized schema bytes.
struct SchemaReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SchemaReader<'a> {
    fn read_u16(&mut self) -> Result<u16> {
        let value = bits::get_u16(self.data, self.position)?;
        self.position += 2;
        Ok(value)
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_u16()? as usize;
        let bytes = self
            .data
            .get(self.position..self.position + length)
            .ok_or(Error::TruncatedRead { position: self.position as u64, wanted: length })?;
        self.position += length;

        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::SchemaDecode("string field is not valid UTF-8".to_string()))
    }
}
