use std::sync::Arc;

use stratum::{CmpOp, Field, Tuple, TupleDesc};

use super::{not_open, wrong_child_count, BoxedOp, OpIterator};
use crate::errors::ExecutionError;

/// Compares one tuple field against a constant operand.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: usize,
    pub op: CmpOp,
    pub operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: CmpOp, operand: Field) -> Self {
        Predicate { field, op, operand }
    }

    pub fn eval(&self, tuple: &Tuple) -> Result<bool, ExecutionError> {
        let field = tuple.field(self.field).ok_or_else(|| {
            ExecutionError::FieldMismatch(format!(
                "predicate field {} out of range for {}",
                self.field,
                tuple.desc()
            ))
        })?;
        Ok(field.compare(self.op, &self.operand))
    }
}

/// Passes through the child tuples that satisfy a predicate.
pub struct Filter {
    predicate: Predicate,
    child: BoxedOp,
    opened: bool,
    lookahead: Option<Tuple>,
}

impl Filter {
    pub fn new(predicate: Predicate, child: BoxedOp) -> Self {
        Filter {
            predicate,
            child,
            opened: false,
            lookahead: None,
        }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        while self.child.has_next()? {
            let tuple = self.child.next()?;
            if self.predicate.eval(&tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

impl OpIterator for Filter {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.lookahead = None;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
        self.lookahead = None;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.child.rewind()?;
        self.lookahead = None;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        if self.lookahead.is_none() {
            self.lookahead = self.fetch_next()?;
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
        self.child.schema()
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

/// Positional projection: keeps the named child columns in the given
/// order.
pub struct Project {
    fields: Vec<usize>,
    schema: Arc<TupleDesc>,
    child: BoxedOp,
    opened: bool,
    lookahead: Option<Tuple>,
}

impl Project {
    pub fn new(fields: Vec<usize>, child: BoxedOp) -> Result<Self, ExecutionError> {
        let input = child.schema();
        let mut columns = Vec::with_capacity(fields.len());
        for &index in &fields {
            let (Some(field_type), Some(name)) =
                (input.field_type(index), input.field_name(index))
            else {
                return Err(ExecutionError::FieldMismatch(format!(
                    "projection field {index} out of range for {input}"
                )));
            };
            columns.push((field_type, name.to_string()));
        }
        Ok(Project {
            fields,
            schema: Arc::new(TupleDesc::new(columns)),
            child,
            opened: false,
            lookahead: None,
        })
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.child.has_next()? {
            return Ok(None);
        }
        let input = self.child.next()?;
        let mut fields = Vec::with_capacity(self.fields.len());
        for &index in &self.fields {
            let field = input.field(index).ok_or_else(|| {
                ExecutionError::FieldMismatch(format!("projection field {index} missing"))
            })?;
            fields.push(field.clone());
        }
        let tuple = Tuple::new(Arc::clone(&self.schema), fields)?;
        Ok(Some(tuple))
    }
}

impl OpIterator for Project {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.lookahead = None;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
        self.lookahead = None;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.child.rewind()?;
        self.lookahead = None;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        if self.lookahead.is_none() {
            self.lookahead = self.fetch_next()?;
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
