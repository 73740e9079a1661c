//! The catalog: name/id resolution for the tables of one database, plus
//! the loader for the line-oriented schema file format
//! `name (field type[, field type]*)` with an optional ` pk` annotation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::heap_file::HeapFile;
use crate::schema::{FieldType, TupleDesc};

#[derive(Clone)]
struct Table {
    file: Arc<HeapFile>,
    name: String,
    primary_key: String,
}

struct CatalogInner {
    by_id: HashMap<u32, Table>,
    by_name: HashMap<String, u32>,
}

/// Maps table names and ids to their heap files and schemas.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            inner: RwLock::new(CatalogInner {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
            }),
        }
    }

    /// Registers a table. On a name conflict the newest registration
    /// wins, mirroring reload-in-place during tests.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: &str) -> u32 {
        let id = file.id();
        let mut inner = self.inner.write();
        inner.by_id.insert(
            id,
            Table {
                file,
                name: name.to_string(),
                primary_key: primary_key.to_string(),
            },
        );
        inner.by_name.insert(name.to_string(), id);
        id
    }

    pub fn table(&self, id: u32) -> Result<Arc<HeapFile>, StorageError> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .map(|table| Arc::clone(&table.file))
            .ok_or_else(|| StorageError::NoSuchTable(format!("id {id}")))
    }

    pub fn table_id(&self, name: &str) -> Result<u32, StorageError> {
        self.inner
            .read()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NoSuchTable(name.to_string()))
    }

    pub fn table_named(&self, name: &str) -> Result<Arc<HeapFile>, StorageError> {
        self.table(self.table_id(name)?)
    }

    pub fn schema(&self, id: u32) -> Result<Arc<TupleDesc>, StorageError> {
        Ok(Arc::clone(self.table(id)?.desc()))
    }

    pub fn table_name(&self, id: u32) -> Result<String, StorageError> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .map(|table| table.name.clone())
            .ok_or_else(|| StorageError::NoSuchTable(format!("id {id}")))
    }

    pub fn primary_key(&self, id: u32) -> Result<String, StorageError> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .map(|table| table.primary_key.clone())
            .ok_or_else(|| StorageError::NoSuchTable(format!("id {id}")))
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.inner.read().by_id.keys().copied().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_id.clear();
        inner.by_name.clear();
    }

    /// Reads a schema file and registers one table per line, with each
    /// table's data in `<schema dir>/<name>.dat`. Returns the new table
    /// ids in file order.
    pub fn load_schema<P: AsRef<Path>>(&self, path: P) -> Result<Vec<u32>, StorageError> {
        let path = path.as_ref();
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let text = fs::read_to_string(path)?;

        let mut ids = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, fields, primary_key) = parse_table_line(line)?;
            let data_path = base_dir.join(format!("{name}.dat"));
            let file = Arc::new(HeapFile::open(data_path, Arc::new(fields))?);
            info!("added table {name} with schema {}", file.desc());
            ids.push(self.add_table(file, &name, &primary_key));
        }
        Ok(ids)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_table_line(line: &str) -> Result<(String, TupleDesc, String), StorageError> {
    let open = line
        .find('(')
        .ok_or_else(|| StorageError::InvalidCatalog(line.to_string()))?;
    let close = line
        .rfind(')')
        .filter(|close| *close > open)
        .ok_or_else(|| StorageError::InvalidCatalog(line.to_string()))?;

    let name = line[..open].trim();
    if name.is_empty() {
        return Err(StorageError::InvalidCatalog(line.to_string()));
    }

    let mut fields = Vec::new();
    let mut primary_key = String::new();
    for column in line[open + 1..close].split(',') {
        let tokens: Vec<&str> = column.split_whitespace().collect();
        let (field_name, type_name) = match tokens.as_slice() {
            [field_name, type_name] => (*field_name, *type_name),
            [field_name, type_name, annotation] => {
                if *annotation != "pk" {
                    return Err(StorageError::InvalidCatalog(format!(
                        "unknown annotation {annotation}"
                    )));
                }
                primary_key = (*field_name).to_string();
                (*field_name, *type_name)
            }
            _ => return Err(StorageError::InvalidCatalog(column.trim().to_string())),
        };

        let field_type = match type_name.to_lowercase().as_str() {
            "int" => FieldType::Int,
            "string" => FieldType::Text,
            other => {
                return Err(StorageError::InvalidCatalog(format!("unknown type {other}")))
            }
        };
        fields.push((field_type, field_name.to_string()));
    }

    Ok((name.to_string(), TupleDesc::new(fields), primary_key))
}
