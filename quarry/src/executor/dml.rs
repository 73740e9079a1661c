use std::sync::Arc;

use log::debug;
use stratum::{BufferPool, Field, FieldType, TransactionId, Tuple, TupleDesc};

use super::{not_open, wrong_child_count, BoxedOp, OpIterator};
use crate::errors::ExecutionError;

fn count_schema() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::new(vec![(FieldType::Int, "count".to_string())]))
}

fn count_row(schema: &Arc<TupleDesc>, count: i32) -> Result<Tuple, ExecutionError> {
    Ok(Tuple::new(Arc::clone(schema), vec![Field::Int(count)])?)
}

/// Inserts every child tuple into a table and reports the number
/// inserted as a single `(count)` row followed by EOF.
///
/// The insertion runs once per operator lifetime; `rewind` re-emits the
/// memoized count rather than inserting again.
pub struct Insert {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    table: u32,
    schema: Arc<TupleDesc>,
    child: BoxedOp,
    count: Option<i32>,
    emitted: bool,
    opened: bool,
}

impl Insert {
    pub fn new(
        pool: Arc<BufferPool>,
        tid: TransactionId,
        table: u32,
        child: BoxedOp,
    ) -> Result<Self, ExecutionError> {
        let table_schema = pool.catalog().schema(table)?;
        if !table_schema.compatible(child.schema()) {
            return Err(ExecutionError::FieldMismatch(format!(
                "cannot insert {} into table with schema {}",
                child.schema(),
                table_schema
            )));
        }
        Ok(Insert {
            pool,
            tid,
            table,
            schema: count_schema(),
            child,
            count: None,
            emitted: false,
            opened: false,
        })
    }

    fn run_once(&mut self) -> Result<i32, ExecutionError> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        let mut count = 0;
        while self.child.has_next()? {
            let tuple = self.child.next()?;
            self.pool.insert_tuple(self.tid, self.table, tuple)?;
            count += 1;
        }
        debug!("{} inserted {count} tuples into table {}", self.tid, self.table);
        self.count = Some(count);
        Ok(count)
    }
}

impl OpIterator for Insert {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.emitted = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
        self.emitted = false;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.child.rewind()?;
        self.emitted = false;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        Ok(!self.emitted)
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        if !self.has_next()? {
            return Err(ExecutionError::NoSuchElement);
        }
        let count = self.run_once()?;
        self.emitted = true;
        count_row(&self.schema, count)
    }

    fn schema(&self) -> &Arc<TupleDesc> {
        &self.schema
    }

    fn children(&mut self) -> Vec<&mut BoxedOp> {
        vec![&mut self.child]
    }

    fn set_children(&mut self, mut children: Vec<BoxedOp>) -> Result<(), ExecutionError> {
        match children.len() {
            1 => {
                self.child = children.remove(0);
                Ok(())
            }
            n => Err(wrong_child_count(1, n)),
        }
    }
}

/// Deletes every child tuple from the table it lives in and reports the
/// number removed as a single `(count)` row followed by EOF. Symmetric
/// to [`Insert`], including the memoized `rewind` behavior.
pub struct Delete {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    schema: Arc<TupleDesc>,
    child: BoxedOp,
    count: Option<i32>,
    emitted: bool,
    opened: bool,
}

impl Delete {
    pub fn new(pool: Arc<BufferPool>, tid: TransactionId, child: BoxedOp) -> Self {
        Delete {
            pool,
            tid,
            schema: count_schema(),
            child,
            count: None,
            emitted: false,
            opened: false,
        }
    }

    fn run_once(&mut self) -> Result<i32, ExecutionError> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        let mut count = 0;
        while self.child.has_next()? {
            let tuple = self.child.next()?;
            self.pool.delete_tuple(self.tid, &tuple)?;
            count += 1;
        }
        debug!("{} deleted {count} tuples", self.tid);
        self.count = Some(count);
        Ok(count)
    }
}

impl OpIterator for Delete {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.emitted = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
        self.emitted = false;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.child.rewind()?;
        self.emitted = false;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        Ok(!self.emitted)
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        if !self.has_next()? {
            return Err(ExecutionError::NoSuchElement);
        }
        let count = self.run_once()?;
        self.emitted = true;
        count_row(&self.schema, count)
    }

    fn schema(&self) -> &Arc<TupleDesc> {
        &self.schema
    }

    fn children(&mut self) -> Vec<&mut BoxedOp> {
        vec![&mut self.child]
    }

    fn set_children(&mut self, mut children: Vec<BoxedOp>) -> Result<(), ExecutionError> {
        match children.len() {
            1 => {
                self.child = children.remove(0);
                Ok(())
            }
            n => Err(wrong_child_count(1, n)),
        }
    }
}
