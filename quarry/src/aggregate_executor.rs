//! Grouped aggregation over a child operator.

use std::collections::HashMap;

use strata::tuple::{Field, FieldType, Tuple, TupleDesc};

use crate::errors::ExecutionError;
use crate::executor::{Executor, TupleIterator};

/// The aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl AggOp {
    pub fn name(&self) -> &'static str {
        match self {
            AggOp::Min => "min",
            AggOp::Max => "max",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Count => "count",
        }
    }
}

/// Single-pass aggregate state: fold tuples in one at a time, then iterate
/// the per-group results. One implementation per aggregated field type.
pub trait Aggregator: Send {
    fn merge_tuple_into_group(&mut self, t: &Tuple) -> Result<(), ExecutionError>;
    fn iterator(&self) -> TupleIterator;
    fn tuple_desc(&self) -> TupleDesc;
}

#[derive(Debug, Clone, Copy, Default)]
struct IntAggState {
    count: i32,
    sum: i64,
    min: Option<i32>,
    max: Option<i32>,
}

/// Aggregates an integer field under {MIN, MAX, SUM, AVG, COUNT}. Min and
/// max initialize from the first tuple seen per group; AVG keeps a running
/// sum and count and divides when iterated.
pub struct IntegerAggregator {
    group_by: Option<usize>,
    group_type: Option<FieldType>,
    agg_field: usize,
    op: AggOp,
    groups: HashMap<Option<Field>, IntAggState>,
}

impl IntegerAggregator {
    pub fn new(
        group_by: Option<usize>,
        group_type: Option<FieldType>,
        agg_field: usize,
        op: AggOp,
    ) -> IntegerAggregator {
        IntegerAggregator {
            group_by,
            group_type,
            agg_field,
            op,
            groups: HashMap::new(),
        }
    }
}

impl Aggregator for IntegerAggregator {
    fn merge_tuple_into_group(&mut self, t: &Tuple) -> Result<(), ExecutionError> {
        let key = match self.group_by {
            Some(g) => Some(t.field(g)?.clone()),
            None => None,
        };
        let value = match t.field(self.agg_field)? {
            Field::Int(v) => *v,
            other => {
                return Err(ExecutionError::TypeMismatch(format!(
                    "integer aggregate over a {:?} field",
                    other.field_type()
                )))
            }
        };

        let state = self.groups.entry(key).or_default();
        state.count += 1;
        state.sum += i64::from(value);
        state.min = Some(state.min.map_or(value, |m| m.min(value)));
        state.max = Some(state.max.map_or(value, |m| m.max(value)));
        Ok(())
    }

    fn iterator(&self) -> TupleIterator {
        let td = self.tuple_desc();
        let mut tuples = Vec::with_capacity(self.groups.len());
        for (key, state) in &self.groups {
            let value = match self.op {
                AggOp::Count => state.count,
                AggOp::Sum => state.sum as i32,
                AggOp::Avg if state.count > 0 => (state.sum / i64::from(state.count)) as i32,
                AggOp::Avg => continue,
                AggOp::Min => match state.min {
                    Some(v) => v,
                    None => continue,
                },
                AggOp::Max => match state.max {
                    Some(v) => v,
                    None => continue,
                },
            };
            let mut t = Tuple::new(td.clone());
            let filled = match key {
                Some(group) => t
                    .set_field(0, group.clone())
                    .and_then(|_| t.set_field(1, Field::Int(value))),
                None => t.set_field(0, Field::Int(value)),
            };
            if filled.is_ok() {
                tuples.push(t);
            }
        }
        TupleIterator::new(td, tuples)
    }

    fn tuple_desc(&self) -> TupleDesc {
        match (self.group_by, self.group_type) {
            (Some(_), Some(group_type)) => {
                TupleDesc::from_types(vec![group_type, FieldType::Int])
            }
            _ => TupleDesc::from_types(vec![FieldType::Int]),
        }
    }
}

/// Aggregates a string field. Only COUNT is defined over strings; the
/// constructor rejects anything else.
pub struct StringAggregator {
    group_by: Option<usize>,
    group_type: Option<FieldType>,
    counts: HashMap<Option<Field>, i32>,
}

impl StringAggregator {
    pub fn new(
        group_by: Option<usize>,
        group_type: Option<FieldType>,
        _agg_field: usize,
        op: AggOp,
    ) -> Result<StringAggregator, ExecutionError> {
        if op != AggOp::Count {
            return Err(ExecutionError::TypeMismatch(format!(
                "{} is not defined over string fields",
                op.name()
            )));
        }
        Ok(StringAggregator {
            group_by,
            group_type,
            counts: HashMap::new(),
        })
    }
}

impl Aggregator for StringAggregator {
    fn merge_tuple_into_group(&mut self, t: &Tuple) -> Result<(), ExecutionError> {
        let key = match self.group_by {
            Some(g) => Some(t.field(g)?.clone()),
            None => None,
        };
        *self.counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn iterator(&self) -> TupleIterator {
        let td = self.tuple_desc();
        let mut tuples = Vec::with_capacity(self.counts.len());
        for (key, count) in &self.counts {
            let mut t = Tuple::new(td.clone());
            let filled = match key {
                Some(group) => t
                    .set_field(0, group.clone())
                    .and_then(|_| t.set_field(1, Field::Int(*count))),
                None => t.set_field(0, Field::Int(*count)),
            };
            if filled.is_ok() {
                tuples.push(t);
            }
        }
        TupleIterator::new(td, tuples)
    }

    fn tuple_desc(&self) -> TupleDesc {
        match (self.group_by, self.group_type) {
            (Some(_), Some(group_type)) => {
                TupleDesc::from_types(vec![group_type, FieldType::Int])
            }
            _ => TupleDesc::from_types(vec![FieldType::Int]),
        }
    }
}

/// The aggregation operator: drains its child once on open, folds every
/// tuple through the matching aggregator, then yields the per-group
/// results. Result schema is `(group, aggregate)` with grouping, or the
/// single aggregate column without.
pub struct Aggregate {
    child: Box<dyn Executor>,
    agg_field: usize,
    group_by: Option<usize>,
    op: AggOp,
    td: TupleDesc,
    results: Option<TupleIterator>,
    opened: bool,
}

impl Aggregate {
    pub fn new(
        child: Box<dyn Executor>,
        agg_field: usize,
        group_by: Option<usize>,
        op: AggOp,
    ) -> Result<Aggregate, ExecutionError> {
        let child_td = child.tuple_desc();
        let agg_name = format!(
            "{}({})",
            op.name(),
            child_td.field_name(agg_field)?.unwrap_or("?")
        );
        let td = match group_by {
            Some(g) => TupleDesc::new(
                vec![child_td.field_type(g)?, FieldType::Int],
                vec![
                    child_td.field_name(g)?.map(|n| n.to_string()),
                    Some(agg_name),
                ],
            ),
            None => TupleDesc::new(vec![FieldType::Int], vec![Some(agg_name)]),
        };
        // Validate the aggregated field exists up front.
        child_td.field_type(agg_field)?;
        Ok(Aggregate {
            child,
            agg_field,
            group_by,
            op,
            td,
            results: None,
            opened: false,
        })
    }

    fn build_aggregator(&self) -> Result<Box<dyn Aggregator>, ExecutionError> {
        let child_td = self.child.tuple_desc();
        let group_type = match self.group_by {
            Some(g) => Some(child_td.field_type(g)?),
            None => None,
        };
        match child_td.field_type(self.agg_field)? {
            FieldType::Int => Ok(Box::new(IntegerAggregator::new(
                self.group_by,
                group_type,
                self.agg_field,
                self.op,
            ))),
            FieldType::Str => Ok(Box::new(StringAggregator::new(
                self.group_by,
                group_type,
                self.agg_field,
                self.op,
            )?)),
        }
    }

    fn aggregate_child(&mut self) -> Result<(), ExecutionError> {
        let mut aggregator = self.build_aggregator()?;
        let mut merged = 0usize;
        while let Some(t) = self.child.next()? {
            aggregator.merge_tuple_into_group(&t)?;
            merged += 1;
        }
        crate::quarry_debug_log!(
            "[Aggregate::aggregate_child] folded {} tuples via {}",
            merged,
            self.op.name()
        );
        let mut results = aggregator.iterator();
        results.open()?;
        self.results = Some(results);
        Ok(())
    }
}

impl Executor for Aggregate {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.aggregate_child()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        match &mut self.results {
            Some(results) => results.next(),
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.aggregate_child()
    }

    fn close(&mut self) {
        self.child.close();
        self.results = None;
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
