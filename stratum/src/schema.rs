use std::fmt;
use std::sync::Arc;

/// On-disk payload size of a [`FieldType::Text`] field, excluding the
/// 4-byte length prefix. Longer strings are truncated on write.
pub const TEXT_LEN: usize = 128;

/// The column types a table can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Text,
}

impl FieldType {
    /// On-disk size of one field of this type.
    pub fn len(self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Text => 4 + TEXT_LEN,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Text => write!(f, "string"),
        }
    }
}

/// Comparison operators used by predicates and field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SchemaItem {
    field_type: FieldType,
    name: String,
}

/// An ordered tuple schema: one `(type, name)` pair per column.
///
/// Descriptors are shared as `Arc<TupleDesc>` between a table, its pages
/// and every tuple read from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    items: Vec<SchemaItem>,
}

impl TupleDesc {
    pub fn new(fields: Vec<(FieldType, String)>) -> Self {
        let items = fields
            .into_iter()
            .map(|(field_type, name)| SchemaItem { field_type, name })
            .collect();
        TupleDesc { items }
    }

    pub fn arity(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, index: usize) -> Option<FieldType> {
        self.items.get(index).map(|item| item.field_type)
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|item| item.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| item.name == name)
    }

    /// On-disk size of one tuple under this schema.
    pub fn byte_len(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    pub fn field_types(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.items.iter().map(|item| item.field_type)
    }

    /// True when both schemas carry the same column types in the same
    /// order. Column names are ignored; they do not affect storage.
    pub fn compatible(&self, other: &TupleDesc) -> bool {
        self.arity() == other.arity()
            && self.field_types().eq(other.field_types())
    }

    /// Concatenation of two schemas, as produced by a join.
    pub fn merge(left: &TupleDesc, right: &TupleDesc) -> Arc<TupleDesc> {
        let mut items = left.items.clone();
        items.extend(right.items.iter().cloned());
        Arc::new(TupleDesc { items })
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", item.name, item.field_type)?;
        }
        write!(f, ")")
    }
}
