//! The operator trait and the core relational operators.

use strata::tuple::{Field, Op, Tuple, TupleDesc};

use crate::errors::ExecutionError;

/// A pull-based tuple producer. Operators compose by owning their children;
/// opening an operator opens its children and closing closes them. `next`
/// on an operator that is not open is an error.
pub trait Executor: Send {
    fn open(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError>;
    fn rewind(&mut self) -> Result<(), ExecutionError>;
    fn close(&mut self);
    fn tuple_desc(&self) -> &TupleDesc;
}

/// Compares one field of a tuple against a literal operand.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: usize,
    op: Op,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: Op, operand: Field) -> Predicate {
        Predicate { field, op, operand }
    }

    pub fn field(&self) -> usize {
        self.field
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn operand(&self) -> &Field {
        &self.operand
    }

    pub fn filter(&self, t: &Tuple) -> Result<bool, ExecutionError> {
        Ok(t.field(self.field)?.compare(self.op, &self.operand)?)
    }
}

/// Compares a field of one tuple against a field of another.
#[derive(Debug, Clone)]
pub struct JoinPredicate {
    field1: usize,
    op: Op,
    field2: usize,
}

impl JoinPredicate {
    pub fn new(field1: usize, op: Op, field2: usize) -> JoinPredicate {
        JoinPredicate { field1, op, field2 }
    }

    pub fn filter(&self, t1: &Tuple, t2: &Tuple) -> Result<bool, ExecutionError> {
        Ok(t1.field(self.field1)?.compare(self.op, t2.field(self.field2)?)?)
    }
}

/// Yields the child tuples that satisfy a predicate.
pub struct Filter {
    predicate: Predicate,
    child: Box<dyn Executor>,
    opened: bool,
}

impl Filter {
    pub fn new(predicate: Predicate, child: Box<dyn Executor>) -> Filter {
        Filter {
            predicate,
            child,
            opened: false,
        }
    }
}

impl Executor for Filter {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        while let Some(t) = self.child.next()? {
            if self.predicate.filter(&t)? {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }
}

/// Nested-loop join: for each outer tuple, rewind the inner child and emit
/// the merged tuple for every inner tuple the predicate accepts.
pub struct Join {
    predicate: JoinPredicate,
    outer: Box<dyn Executor>,
    inner: Box<dyn Executor>,
    td: TupleDesc,
    current_outer: Option<Tuple>,
    opened: bool,
}

impl Join {
    pub fn new(
        predicate: JoinPredicate,
        outer: Box<dyn Executor>,
        inner: Box<dyn Executor>,
    ) -> Join {
        let td = TupleDesc::merge(outer.tuple_desc(), inner.tuple_desc());
        Join {
            predicate,
            outer,
            inner,
            td,
            current_outer: None,
            opened: false,
        }
    }
}

impl Executor for Join {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.outer.open()?;
        self.inner.open()?;
        self.current_outer = None;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        loop {
            if self.current_outer.is_none() {
                match self.outer.next()? {
                    Some(t) => {
                        self.current_outer = Some(t);
                        self.inner.rewind()?;
                    }
                    None => return Ok(None),
                }
            }
            let outer = match &self.current_outer {
                Some(t) => t.clone(),
                None => continue,
            };
            match self.inner.next()? {
                Some(inner) => {
                    if self.predicate.filter(&outer, &inner)? {
                        return Ok(Some(Tuple::merge(&outer, &inner)));
                    }
                }
                None => {
                    self.current_outer = None;
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.outer.rewind()?;
        self.inner.rewind()?;
        self.current_outer = None;
        Ok(())
    }

    fn close(&mut self) {
        self.outer.close();
        self.inner.close();
        self.current_outer = None;
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}

/// An executor over a materialized list of tuples. Used for aggregate
/// results and anywhere a fixed tuple set needs the operator interface.
pub struct TupleIterator {
    td: TupleDesc,
    tuples: Vec<Tuple>,
    pos: usize,
    opened: bool,
}

impl TupleIterator {
    pub fn new(td: TupleDesc, tuples: Vec<Tuple>) -> TupleIterator {
        TupleIterator {
            td,
            tuples,
            pos: 0,
            opened: false,
        }
    }
}

impl Executor for TupleIterator {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.pos = 0;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        match self.tuples.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                Ok(Some(t.clone()))
            }
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
