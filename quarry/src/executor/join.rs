use std::sync::Arc;

use stratum::{CmpOp, Tuple, TupleDesc};

use super::{not_open, wrong_child_count, BoxedOp, OpIterator};
use crate::errors::ExecutionError;

/// Compares a field of the left tuple against a field of the right.
#[derive(Debug, Clone)]
pub struct JoinPredicate {
    pub left: usize,
    pub op: CmpOp,
    pub right: usize,
}

impl JoinPredicate {
    pub fn new(left: usize, op: CmpOp, right: usize) -> Self {
        JoinPredicate { left, op, right }
    }

    fn eval(&self, left: &Tuple, right: &Tuple) -> Result<bool, ExecutionError> {
        let a = left.field(self.left).ok_or_else(|| {
            ExecutionError::FieldMismatch(format!("join field {} missing on the left", self.left))
        })?;
        let b = right.field(self.right).ok_or_else(|| {
            ExecutionError::FieldMismatch(format!("join field {} missing on the right", self.right))
        })?;
        Ok(a.compare(self.op, b))
    }
}

/// Nested-loop join: for each left tuple the right child is drained and
/// rewound. The output schema is the concatenation of the children's.
pub struct Join {
    predicate: JoinPredicate,
    schema: Arc<TupleDesc>,
    left: BoxedOp,
    right: BoxedOp,
    current_left: Option<Tuple>,
    opened: bool,
    lookahead: Option<Tuple>,
}

impl Join {
    pub fn new(predicate: JoinPredicate, left: BoxedOp, right: BoxedOp) -> Self {
        let schema = TupleDesc::merge(left.schema(), right.schema());
        Join {
            predicate,
            schema,
            left,
            right,
            current_left: None,
            opened: false,
            lookahead: None,
        }
    }

    fn merged(&self, left: &Tuple, right: &Tuple) -> Result<Tuple, ExecutionError> {
        let mut fields = Vec::with_capacity(self.schema.arity());
        fields.extend(left.fields().iter().cloned());
        fields.extend(right.fields().iter().cloned());
        Ok(Tuple::new(Arc::clone(&self.schema), fields)?)
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        loop {
            if self.current_left.is_none() {
                if !self.left.has_next()? {
                    return Ok(None);
                }
                self.current_left = Some(self.left.next()?);
            }
            let Some(left) = self.current_left.clone() else {
                return Ok(None);
            };

            while self.right.has_next()? {
                let right = self.right.next()?;
                if self.predicate.eval(&left, &right)? {
                    return Ok(Some(self.merged(&left, &right)?));
                }
            }

            // Right side exhausted for this left tuple; restart it.
            self.right.rewind()?;
            self.current_left = None;
        }
    }
}

impl OpIterator for Join {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.left.open()?;
        self.right.open()?;
        self.opened = true;
        self.current_left = None;
        self.lookahead = None;
        Ok(())
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.opened = false;
        self.current_left = None;
        self.lookahead = None;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.left.rewind()?;
        self.right.rewind()?;
        self.current_left = None;
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
        vec![&mut self.left, &mut self.right]
    }

    fn set_children(&mut self, mut children: Vec<BoxedOp>) -> Result<(), ExecutionError> {
        match children.len() {
            2 => {
                self.right = children.remove(1);
                self.left = children.remove(0);
                Ok(())
            }
            n => Err(wrong_child_count(2, n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{int_row, int_schema, StaticRows};
    use stratum::Field;

    #[test]
    fn equi_join_pairs_matching_rows() {
        let left_schema = int_schema(&["id", "v"]);
        let right_schema = int_schema(&["id", "w"]);
        let left = Box::new(StaticRows::new(
            Arc::clone(&left_schema),
            vec![
                int_row(&left_schema, &[1, 10]),
                int_row(&left_schema, &[2, 20]),
                int_row(&left_schema, &[3, 30]),
            ],
        ));
        let right = Box::new(StaticRows::new(
            Arc::clone(&right_schema),
            vec![
                int_row(&right_schema, &[2, 200]),
                int_row(&right_schema, &[1, 100]),
                int_row(&right_schema, &[2, 201]),
            ],
        ));

        let mut join = Join::new(JoinPredicate::new(0, CmpOp::Eq, 0), left, right);
        assert_eq!(join.schema().arity(), 4);

        join.open().unwrap();
        let mut pairs = Vec::new();
        while join.has_next().unwrap() {
            let tuple = join.next().unwrap();
            match (tuple.field(1), tuple.field(3)) {
                (Some(Field::Int(v)), Some(Field::Int(w))) => pairs.push((*v, *w)),
                other => panic!("unexpected fields {other:?}"),
            }
        }
        assert_eq!(pairs, vec![(10, 100), (20, 200), (20, 201)]);
    }

    #[test]
    fn join_with_no_matches_is_empty() {
        let schema = int_schema(&["x"]);
        let left = Box::new(StaticRows::new(
            Arc::clone(&schema),
            vec![int_row(&schema, &[1])],
        ));
        let right = Box::new(StaticRows::new(
            Arc::clone(&schema),
            vec![int_row(&schema, &[2])],
        ));

        let mut join = Join::new(JoinPredicate::new(0, CmpOp::Eq, 0), left, right);
        join.open().unwrap();
        assert!(!join.has_next().unwrap());
        assert!(matches!(join.next(), Err(ExecutionError::NoSuchElement)));
    }

    #[test]
    fn rewind_replays_the_whole_cross_product() {
        let schema = int_schema(&["x"]);
        let rows = vec![int_row(&schema, &[7]), int_row(&schema, &[7])];
        let left = Box::new(StaticRows::new(Arc::clone(&schema), rows.clone()));
        let right = Box::new(StaticRows::new(Arc::clone(&schema), rows));

        let mut join = Join::new(JoinPredicate::new(0, CmpOp::Eq, 0), left, right);
        join.open().unwrap();
        let mut first_pass = 0;
        while join.has_next().unwrap() {
            join.next().unwrap();
            first_pass += 1;
        }
        join.rewind().unwrap();
        let mut second_pass = 0;
        while join.has_next().unwrap() {
            join.next().unwrap();
            second_pass += 1;
        }
        assert_eq!(first_pass, 4);
        assert_eq!(second_pass, 4);
    }
}
