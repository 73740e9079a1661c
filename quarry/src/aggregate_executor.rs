//! Grouped and ungrouped incremental aggregation behind the iterator
//! contract: an aggregator folds tuples one at a time via `merge` and
//! hands back its result rows as an [`OpIterator`].

use std::collections::HashMap;
use std::sync::Arc;

use stratum::{Field, FieldType, Tuple, TupleDesc};

use crate::errors::ExecutionError;
use crate::executor::{not_open, wrong_child_count, BoxedOp, OpIterator};

/// The aggregate operators. The display name doubles as the output
/// column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl std::fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVG",
            AggregateOp::Count => "COUNT",
        };
        write!(f, "{name}")
    }
}

/// One running aggregate. The sum and count are retained separately so
/// AVG stays exact no matter how many tuples arrive after the first.
#[derive(Debug, Clone)]
struct Accumulator {
    min: i64,
    max: i64,
    sum: i64,
    count: i64,
}

impl Accumulator {
    fn seed(value: i64) -> Self {
        Accumulator {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn fold(&mut self, value: i64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    fn value(&self, op: AggregateOp) -> i32 {
        match op {
            AggregateOp::Min => self.min as i32,
            AggregateOp::Max => self.max as i32,
            AggregateOp::Sum => self.sum as i32,
            // Integer division, truncating toward zero.
            AggregateOp::Avg => (self.sum / self.count) as i32,
            AggregateOp::Count => self.count as i32,
        }
    }
}

fn output_schema(op: AggregateOp, group_by: Option<(usize, FieldType)>) -> Arc<TupleDesc> {
    match group_by {
        None => Arc::new(TupleDesc::new(vec![(FieldType::Int, op.to_string())])),
        Some((_, group_type)) => Arc::new(TupleDesc::new(vec![
            (group_type, "groupby".to_string()),
            (FieldType::Int, op.to_string()),
        ])),
    }
}

/// Shared accumulator state of the two aggregator variants: either one
/// global accumulator (no grouping) or a map keyed by the group-by
/// field's value.
struct GroupedState {
    op: AggregateOp,
    group_by: Option<(usize, FieldType)>,
    schema: Arc<TupleDesc>,
    groups: HashMap<Field, Accumulator>,
    global: Option<Accumulator>,
}

impl GroupedState {
    fn new(op: AggregateOp, group_by: Option<(usize, FieldType)>) -> Self {
        GroupedState {
            op,
            group_by,
            schema: output_schema(op, group_by),
            groups: HashMap::new(),
            global: None,
        }
    }

    fn fold(&mut self, tuple: &Tuple, value: i64) -> Result<(), ExecutionError> {
        let Some((index, group_type)) = self.group_by else {
            match self.global.as_mut() {
                Some(acc) => acc.fold(value),
                None => self.global = Some(Accumulator::seed(value)),
            }
            return Ok(());
        };

        let key = tuple.field(index).ok_or_else(|| {
            ExecutionError::FieldMismatch(format!("group-by field {index} missing"))
        })?;
        if key.field_type() != group_type {
            return Err(ExecutionError::FieldMismatch(format!(
                "group-by field {index} is not {group_type:?}"
            )));
        }
        match self.groups.get_mut(key) {
            Some(acc) => acc.fold(value),
            None => {
                self.groups.insert(key.clone(), Accumulator::seed(value));
            }
        }
        Ok(())
    }

    /// Snapshots the result rows. An aggregator that never merged
    /// anything has no rows.
    fn rows(&self) -> Vec<Tuple> {
        let mut rows = Vec::new();
        if self.group_by.is_none() {
            if let Some(acc) = &self.global {
                if let Ok(tuple) = Tuple::new(
                    Arc::clone(&self.schema),
                    vec![Field::Int(acc.value(self.op))],
                ) {
                    rows.push(tuple);
                }
            }
        } else {
            for (key, acc) in &self.groups {
                if let Ok(tuple) = Tuple::new(
                    Arc::clone(&self.schema),
                    vec![key.clone(), Field::Int(acc.value(self.op))],
                ) {
                    rows.push(tuple);
                }
            }
        }
        rows
    }

    fn iterator(&self) -> BoxedOp {
        Box::new(AggregateResults {
            schema: Arc::clone(&self.schema),
            rows: self.rows(),
            cursor: 0,
            opened: false,
        })
    }
}

/// Folds tuples into running per-group state and reports the results
/// through a fresh iterator.
pub trait Aggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError>;

    /// A pull iterator over the result rows accumulated so far.
    fn iterator(&self) -> BoxedOp;
}

/// Aggregates an integer column with MIN, MAX, SUM, AVG or COUNT.
pub struct IntAggregator {
    field: usize,
    state: GroupedState,
}

impl IntAggregator {
    pub fn new(group_by: Option<(usize, FieldType)>, field: usize, op: AggregateOp) -> Self {
        IntAggregator {
            field,
            state: GroupedState::new(op, group_by),
        }
    }
}

impl Aggregator for IntAggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        let value = match tuple.field(self.field) {
            Some(Field::Int(value)) => i64::from(*value),
            other => {
                return Err(ExecutionError::FieldMismatch(format!(
                    "aggregate field {} is {other:?}, expected an int",
                    self.field
                )))
            }
        };
        self.state.fold(tuple, value)
    }

    fn iterator(&self) -> BoxedOp {
        self.state.iterator()
    }
}

/// Aggregates a string column. Only COUNT is meaningful over strings;
/// anything else is rejected at construction.
pub struct StrAggregator {
    field: usize,
    state: GroupedState,
}

impl StrAggregator {
    pub fn new(
        group_by: Option<(usize, FieldType)>,
        field: usize,
        op: AggregateOp,
    ) -> Result<Self, ExecutionError> {
        if op != AggregateOp::Count {
            return Err(ExecutionError::Unsupported(format!(
                "{op} over a string column"
            )));
        }
        Ok(StrAggregator {
            field,
            state: GroupedState::new(op, group_by),
        })
    }
}

impl Aggregator for StrAggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        // The field's value is unused; only its presence counts.
        if tuple.field(self.field).is_none() {
            return Err(ExecutionError::FieldMismatch(format!(
                "aggregate field {} missing",
                self.field
            )));
        }
        self.state.fold(tuple, 0)
    }

    fn iterator(&self) -> BoxedOp {
        self.state.iterator()
    }
}

/// The iterator an aggregator hands out: a fixed snapshot of result
/// rows behind the full operator contract.
struct AggregateResults {
    schema: Arc<TupleDesc>,
    rows: Vec<Tuple>,
    cursor: usize,
    opened: bool,
}

impl OpIterator for AggregateResults {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.opened = true;
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
        self.cursor = 0;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        self.cursor = 0;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        if !self.opened {
            return Err(not_open());
        }
        Ok(self.cursor < self.rows.len())
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        if !self.has_next()? {
            return Err(ExecutionError::NoSuchElement);
        }
        let tuple = self.rows[self.cursor].clone();
        self.cursor += 1;
        Ok(tuple)
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

/// The aggregation operator: drains its child into an aggregator at
/// `open`, then iterates the result rows.
pub struct Aggregate {
    child: BoxedOp,
    field: usize,
    field_type: FieldType,
    group_by: Option<(usize, FieldType)>,
    op: AggregateOp,
    schema: Arc<TupleDesc>,
    results: Option<BoxedOp>,
    opened: bool,
}

impl Aggregate {
    pub fn new(
        child: BoxedOp,
        field: usize,
        group_by: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self, ExecutionError> {
        let input = child.schema();
        let field_type = input.field_type(field).ok_or_else(|| {
            ExecutionError::FieldMismatch(format!("aggregate field {field} out of range"))
        })?;
        let group_by = match group_by {
            None => None,
            Some(index) => {
                let group_type = input.field_type(index).ok_or_else(|| {
                    ExecutionError::FieldMismatch(format!("group-by field {index} out of range"))
                })?;
                Some((index, group_type))
            }
        };
        if field_type == FieldType::Text && op != AggregateOp::Count {
            return Err(ExecutionError::Unsupported(format!(
                "{op} over a string column"
            )));
        }
        Ok(Aggregate {
            child,
            field,
            field_type,
            group_by,
            op,
            schema: output_schema(op, group_by),
            results: None,
            opened: false,
        })
    }

    fn build_aggregator(&self) -> Result<Box<dyn Aggregator>, ExecutionError> {
        match self.field_type {
            FieldType::Int => Ok(Box::new(IntAggregator::new(
                self.group_by,
                self.field,
                self.op,
            ))),
            FieldType::Text => Ok(Box::new(StrAggregator::new(
                self.group_by,
                self.field,
                self.op,
            )?)),
        }
    }
}

impl OpIterator for Aggregate {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        let mut aggregator = self.build_aggregator()?;
        while self.child.has_next()? {
            aggregator.merge(&self.child.next()?)?;
        }
        let mut results = aggregator.iterator();
        results.open()?;
        self.results = Some(results);
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.results = None;
        self.opened = false;
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        match self.results.as_mut() {
            Some(results) if self.opened => results.rewind(),
            _ => Err(not_open()),
        }
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        match self.results.as_mut() {
            Some(results) if self.opened => results.has_next(),
            _ => Err(not_open()),
        }
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        match self.results.as_mut() {
            Some(results) if self.opened => results.next(),
            _ => Err(not_open()),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{int_row, int_schema, StaticRows};

    fn merge_ints(agg: &mut dyn Aggregator, values: &[i32]) {
        let schema = int_schema(&["v"]);
        for v in values {
            agg.merge(&int_row(&schema, &[*v])).unwrap();
        }
    }

    fn single_result(agg: &dyn Aggregator) -> i32 {
        let mut iter = agg.iterator();
        iter.open().unwrap();
        let tuple = iter.next().unwrap();
        assert!(!iter.has_next().unwrap());
        match tuple.field(0) {
            Some(Field::Int(v)) => *v,
            other => panic!("unexpected field {other:?}"),
        }
    }

    #[test]
    fn ungrouped_avg_truncates_toward_zero() {
        let mut agg = IntAggregator::new(None, 0, AggregateOp::Avg);
        merge_ints(&mut agg, &[3, 1, 4, 1, 5, 9, 2, 6]);
        // 31 / 8
        assert_eq!(single_result(&agg), 3);
    }

    #[test]
    fn results_are_order_independent() {
        let permutations: [&[i32]; 3] = [
            &[3, 1, 4, 1, 5, 9, 2, 6],
            &[6, 2, 9, 5, 1, 4, 1, 3],
            &[1, 1, 2, 3, 4, 5, 6, 9],
        ];
        for op in [
            AggregateOp::Min,
            AggregateOp::Max,
            AggregateOp::Sum,
            AggregateOp::Avg,
            AggregateOp::Count,
        ] {
            let mut results = Vec::new();
            for values in permutations {
                let mut agg = IntAggregator::new(None, 0, op);
                merge_ints(&mut agg, values);
                results.push(single_result(&agg));
            }
            assert_eq!(results[0], results[1], "{op} varies with input order");
            assert_eq!(results[0], results[2], "{op} varies with input order");
        }
    }

    #[test]
    fn avg_stays_exact_as_tuples_keep_arriving() {
        let mut agg = IntAggregator::new(None, 0, AggregateOp::Avg);
        merge_ints(&mut agg, &[10]);
        assert_eq!(single_result(&agg), 10);
        merge_ints(&mut agg, &[0]);
        assert_eq!(single_result(&agg), 5);
        // A rounded running average would have drifted here: the true
        // state is sum=10, count=3.
        merge_ints(&mut agg, &[0]);
        assert_eq!(single_result(&agg), 3);
    }

    #[test]
    fn grouped_aggregates_partition_by_field_value() {
        let schema = int_schema(&["g", "v"]);
        let mut agg = IntAggregator::new(Some((0, FieldType::Int)), 1, AggregateOp::Sum);
        for (g, v) in [(1, 10), (2, 5), (1, 7), (2, 5), (3, 0)] {
            agg.merge(&int_row(&schema, &[g, v])).unwrap();
        }

        let mut iter = agg.iterator();
        assert_eq!(iter.schema().field_name(0), Some("groupby"));
        assert_eq!(iter.schema().field_name(1), Some("SUM"));

        iter.open().unwrap();
        let mut sums = std::collections::HashMap::new();
        while iter.has_next().unwrap() {
            let tuple = iter.next().unwrap();
            match (tuple.field(0), tuple.field(1)) {
                (Some(Field::Int(g)), Some(Field::Int(s))) => {
                    sums.insert(*g, *s);
                }
                other => panic!("unexpected fields {other:?}"),
            }
        }
        assert_eq!(sums.len(), 3);
        assert_eq!(sums[&1], 17);
        assert_eq!(sums[&2], 10);
        assert_eq!(sums[&3], 0);
    }

    #[test]
    fn string_count_groups_by_first_column() {
        let schema = Arc::new(TupleDesc::new(vec![
            (FieldType::Text, "k".to_string()),
            (FieldType::Text, "v".to_string()),
        ]));
        let mut agg =
            StrAggregator::new(Some((0, FieldType::Text)), 1, AggregateOp::Count).unwrap();
        for (k, v) in [("a", "x"), ("b", "y"), ("a", "z")] {
            let tuple = Tuple::new(
                Arc::clone(&schema),
                vec![Field::Text(k.to_string()), Field::Text(v.to_string())],
            )
            .unwrap();
            agg.merge(&tuple).unwrap();
        }

        let mut iter = agg.iterator();
        iter.open().unwrap();
        let mut counts = std::collections::HashMap::new();
        while iter.has_next().unwrap() {
            let tuple = iter.next().unwrap();
            match (tuple.field(0), tuple.field(1)) {
                (Some(Field::Text(k)), Some(Field::Int(c))) => {
                    counts.insert(k.clone(), *c);
                }
                other => panic!("unexpected fields {other:?}"),
            }
        }
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 1);
    }

    #[test]
    fn string_aggregator_supports_count_only() {
        for op in [
            AggregateOp::Min,
            AggregateOp::Max,
            AggregateOp::Sum,
            AggregateOp::Avg,
        ] {
            assert!(matches!(
                StrAggregator::new(None, 0, op),
                Err(ExecutionError::Unsupported(_))
            ));
        }
        assert!(StrAggregator::new(None, 0, AggregateOp::Count).is_ok());
    }

    #[test]
    fn empty_aggregator_yields_no_rows() {
        let agg = IntAggregator::new(None, 0, AggregateOp::Count);
        let mut iter = agg.iterator();
        iter.open().unwrap();
        assert!(!iter.has_next().unwrap());
        assert!(matches!(iter.next(), Err(ExecutionError::NoSuchElement)));
    }

    #[test]
    fn ungrouped_schema_is_named_after_the_operator() {
        let agg = IntAggregator::new(None, 0, AggregateOp::Min);
        let iter = agg.iterator();
        assert_eq!(iter.schema().arity(), 1);
        assert_eq!(iter.schema().field_name(0), Some("MIN"));
    }

    #[test]
    fn aggregate_operator_drains_its_child_at_open() {
        let schema = int_schema(&["v"]);
        let rows = [3, 1, 4, 1, 5, 9, 2, 6]
            .iter()
            .map(|v| int_row(&schema, &[*v]))
            .collect();
        let child = Box::new(StaticRows::new(Arc::clone(&schema), rows));
        let mut agg = Aggregate::new(child, 0, None, AggregateOp::Avg).unwrap();

        agg.open().unwrap();
        assert!(agg.has_next().unwrap());
        let tuple = agg.next().unwrap();
        assert_eq!(tuple.field(0), Some(&Field::Int(3)));
        assert!(!agg.has_next().unwrap());

        agg.rewind().unwrap();
        assert_eq!(agg.next().unwrap().field(0), Some(&Field::Int(3)));
        agg.close();
        assert!(matches!(
            agg.has_next(),
            Err(ExecutionError::IllegalState(_))
        ));
    }

    #[test]
    fn aggregate_operator_rejects_string_min_up_front() {
        let schema = Arc::new(TupleDesc::new(vec![(FieldType::Text, "s".to_string())]));
        let child = Box::new(StaticRows::new(Arc::clone(&schema), Vec::new()));
        assert!(matches!(
            Aggregate::new(child, 0, None, AggregateOp::Min),
            Err(ExecutionError::Unsupported(_))
        ));
    }
}
