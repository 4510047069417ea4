//! Sorting: materialize the child and yield its tuples ordered by a field.

use strata::tuple::{Tuple, TupleDesc};

use crate::errors::ExecutionError;
use crate::executor::Executor;

/// Materializes the child on open and yields tuples sorted by one field,
/// ascending or descending. The sort is stable, so ties keep child order.
pub struct OrderBy {
    child: Box<dyn Executor>,
    order_field: usize,
    ascending: bool,
    tuples: Vec<Tuple>,
    pos: usize,
    opened: bool,
}

impl OrderBy {
    pub fn new(
        child: Box<dyn Executor>,
        order_field: usize,
        ascending: bool,
    ) -> Result<OrderBy, ExecutionError> {
        // Reject a bad field index up front rather than at open time.
        child.tuple_desc().field_type(order_field)?;
        Ok(OrderBy {
            child,
            order_field,
            ascending,
            tuples: Vec::new(),
            pos: 0,
            opened: false,
        })
    }

    /// Construct by field name.
    pub fn by_name(
        child: Box<dyn Executor>,
        field: &str,
        ascending: bool,
    ) -> Result<OrderBy, ExecutionError> {
        let order_field = child
            .tuple_desc()
            .index_of(field)
            .map_err(|_| ExecutionError::FieldNotFound(field.to_string()))?;
        OrderBy::new(child, order_field, ascending)
    }
}

impl Executor for OrderBy {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.tuples.clear();
        while let Some(t) = self.child.next()? {
            self.tuples.push(t);
        }
        let field = self.order_field;
        self.tuples.sort_by(|a, b| {
            let ord = match (a.field(field), b.field(field)) {
                (Ok(fa), Ok(fb)) => fa.cmp_same_type(fb),
                _ => std::cmp::Ordering::Equal,
            };
            ord
        });
        if !self.ascending {
            self.tuples.reverse();
        }
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
        self.child.close();
        self.tuples.clear();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::tuple::{Field, FieldType};

    use crate::executor::TupleIterator;

    fn rows(values: &[i32]) -> TupleIterator {
        let td = TupleDesc::new(
            vec![FieldType::Int],
            vec![Some("n".to_string())],
        );
        let tuples = values
            .iter()
            .map(|v| {
                let mut t = Tuple::new(td.clone());
                t.set_field(0, Field::Int(*v)).unwrap();
                t
            })
            .collect();
        TupleIterator::new(td, tuples)
    }

    fn ints(order_by: &mut OrderBy) -> Vec<i32> {
        let mut out = Vec::new();
        while let Some(t) = order_by.next().unwrap() {
            match t.field(0).unwrap() {
                Field::Int(v) => out.push(*v),
                _ => panic!("expected int"),
            }
        }
        out
    }

    #[test]
    fn sorts_ascending_and_descending() {
        let mut asc = OrderBy::new(Box::new(rows(&[3, 1, 4, 1, 5])), 0, true).unwrap();
        asc.open().unwrap();
        assert_eq!(ints(&mut asc), vec![1, 1, 3, 4, 5]);

        let mut desc = OrderBy::new(Box::new(rows(&[3, 1, 4, 1, 5])), 0, false).unwrap();
        desc.open().unwrap();
        assert_eq!(ints(&mut desc), vec![5, 4, 3, 1, 1]);
    }

    #[test]
    fn rewind_restarts_the_sorted_stream() {
        let mut ob = OrderBy::new(Box::new(rows(&[2, 1])), 0, true).unwrap();
        ob.open().unwrap();
        assert_eq!(ints(&mut ob), vec![1, 2]);
        ob.rewind().unwrap();
        assert_eq!(ints(&mut ob), vec![1, 2]);
    }

    #[test]
    fn unknown_field_is_rejected_at_construction() {
        assert!(OrderBy::new(Box::new(rows(&[1])), 3, true).is_err());
        assert!(matches!(
            OrderBy::by_name(Box::new(rows(&[1])), "missing", true),
            Err(ExecutionError::FieldNotFound(_))
        ));
    }
}
