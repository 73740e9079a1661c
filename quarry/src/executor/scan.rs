use std::sync::Arc;

use stratum::{BufferPool, HeapFileIterator, TransactionId, Tuple, TupleDesc};

use super::{not_open, wrong_child_count, BoxedOp, OpIterator};
use crate::errors::ExecutionError;

/// Sequential scan over one table, in page-index then slot order. The
/// leaf of most operator trees; every page it touches is fetched through
/// the buffer pool under a shared latch.
pub struct SeqScan {
    schema: Arc<TupleDesc>,
    iter: HeapFileIterator,
    opened: bool,
    lookahead: Option<Tuple>,
}

impl SeqScan {
    pub fn new(
        pool: &Arc<BufferPool>,
        tid: TransactionId,
        table: u32,
    ) -> Result<Self, ExecutionError> {
        let file = pool.catalog().table(table)?;
        Ok(SeqScan {
            schema: Arc::clone(file.desc()),
            iter: file.iter(Arc::clone(pool), tid),
            opened: false,
            lookahead: None,
        })
    }
}

impl OpIterator for SeqScan {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.iter.open()?;
        self.opened = true;
        self.lookahead = None;
        Ok(())
    }

    fn close(&mut self) {
        self.iter.close();
        self.opened = false;
        self.lookahead = None;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.iter.rewind()?;
        self.lookahead = None;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        if self.lookahead.is_none() {
            self.lookahead = self.iter.next()?;
        }
        Ok(self.lookahead.is_some())
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        if !self.has_next()? {
            return Err(ExecutionError::NoSuchElement);
        }
        self.lookahead.take().ok_or(ExecutionError::NoSuchElement)
    }

    fn schema(&self) -> &Arc<TupleDesc> {
        &self.schema
    }

    fn children(&mut self) -> Vec<&mut BoxedOp> {
        Vec::new()
    }

    fn set_children(&mut self, children: Vec<BoxedOp>) -> Result<(), ExecutionError> {
        if children.is_empty() {
            Ok(())
        } else {
            Err(wrong_child_count(0, children.len()))
        }
    }
}
