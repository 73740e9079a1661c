use std::fmt;
use std::sync::Arc;

use crate::error::StorageError;
use crate::page::PageId;
use crate::schema::{CmpOp, FieldType, TupleDesc, TEXT_LEN};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Text(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Text(_) => FieldType::Text,
        }
    }

    /// Evaluates `self op other`. Values of different types never
    /// compare as anything but unequal.
    pub fn compare(&self, op: CmpOp, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Self::compare_ord(op, a.cmp(b)),
            (Field::Text(a), Field::Text(b)) => Self::compare_ord(op, a.cmp(b)),
            _ => op == CmpOp::NotEq,
        }
    }

    fn compare_ord(op: CmpOp, ord: std::cmp::Ordering) -> bool {
        match op {
            CmpOp::Eq => ord.is_eq(),
            CmpOp::NotEq => ord.is_ne(),
            CmpOp::Lt => ord.is_lt(),
            CmpOp::LtEq => ord.is_le(),
            CmpOp::Gt => ord.is_gt(),
            CmpOp::GtEq => ord.is_ge(),
        }
    }

    /// Appends the field's fixed-width byte representation. `Int` is
    /// 4 bytes big-endian; `Text` is a 4-byte big-endian length followed
    /// by exactly [`TEXT_LEN`] payload bytes, zero-padded or truncated at
    /// a character boundary.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Field::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::Text(s) => {
                let mut len = s.len().min(TEXT_LEN);
                while !s.is_char_boundary(len) {
                    len -= 1;
                }
                out.extend_from_slice(&(len as u32).to_be_bytes());
                out.extend_from_slice(&s.as_bytes()[..len]);
                out.extend(std::iter::repeat(0).take(TEXT_LEN - len));
            }
        }
    }

    /// Reads one field of the given type from the front of `bytes`.
    pub fn read_from(field_type: FieldType, bytes: &[u8]) -> Result<Field, StorageError> {
        if bytes.len() < field_type.len() {
            return Err(StorageError::PageCorrupt(format!(
                "field needs {} bytes, {} remain",
                field_type.len(),
                bytes.len()
            )));
        }
        match field_type {
            FieldType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                Ok(Field::Int(i32::from_be_bytes(buf)))
            }
            FieldType::Text => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                let len = (u32::from_be_bytes(buf) as usize).min(TEXT_LEN);
                let payload = &bytes[4..4 + len];
                let text = std::str::from_utf8(payload).map_err(|_| {
                    StorageError::PageCorrupt("text field is not valid utf-8".to_string())
                })?;
                Ok(Field::Text(text.to_string()))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Where a tuple lives on disk: a page plus a slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page: PageId,
    pub slot: usize,
}

/// A row: a shared schema, one field per column, and the record id of the
/// slot it occupies once stored.
///
/// Equality compares schema and fields only; two tuples with the same
/// values are equal regardless of where (or whether) they are stored.
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Result<Tuple, StorageError> {
        if fields.len() != desc.arity() {
            return Err(StorageError::SchemaMismatch(format!(
                "{} fields for a {}-column schema",
                fields.len(),
                desc.arity()
            )));
        }
        for (i, field) in fields.iter().enumerate() {
            if Some(field.field_type()) != desc.field_type(i) {
                return Err(StorageError::SchemaMismatch(format!(
                    "column {i} expects {:?}",
                    desc.field_type(i)
                )));
            }
        }
        Ok(Tuple {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            field.write_to(out);
        }
    }

    /// Deserializes one tuple from the front of `bytes`.
    pub fn read_from(desc: Arc<TupleDesc>, bytes: &[u8]) -> Result<Tuple, StorageError> {
        let mut fields = Vec::with_capacity(desc.arity());
        let mut offset = 0;
        for field_type in desc.field_types() {
            fields.push(Field::read_from(field_type, &bytes[offset..])?);
            offset += field_type.len();
        }
        Ok(Tuple {
            desc,
            fields,
            record_id: None,
        })
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}
