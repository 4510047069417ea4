//! Insert and Delete: one-shot operators that drain their child and report
//! an affected-row count.

use std::sync::Arc;

use strata::tuple::{Field, FieldType, Tuple, TupleDesc};
use strata::{Db, TransactionId};

use crate::errors::ExecutionError;
use crate::executor::Executor;

fn count_desc(name: &str) -> TupleDesc {
    TupleDesc::new(vec![FieldType::Int], vec![Some(name.to_string())])
}

fn count_tuple(td: &TupleDesc, count: i32) -> Result<Tuple, ExecutionError> {
    let mut t = Tuple::new(td.clone());
    t.set_field(0, Field::Int(count))?;
    Ok(t)
}

/// Inserts every child tuple into a table through the buffer pool, then
/// emits a single `(count)` tuple. A second `next` is end-of-stream.
pub struct Insert {
    db: Arc<Db>,
    tid: TransactionId,
    child: Box<dyn Executor>,
    table_id: u32,
    td: TupleDesc,
    fetched: bool,
    opened: bool,
}

impl Insert {
    pub fn new(
        db: Arc<Db>,
        tid: TransactionId,
        child: Box<dyn Executor>,
        table_id: u32,
    ) -> Result<Insert, ExecutionError> {
        let table_td = db.catalog().get_tuple_desc(table_id)?;
        if child.tuple_desc() != &table_td {
            return Err(ExecutionError::TypeMismatch(
                "child schema does not match the table being inserted into".to_string(),
            ));
        }
        Ok(Insert {
            db,
            tid,
            child,
            table_id,
            td: count_desc("inserted"),
            fetched: false,
            opened: false,
        })
    }
}

impl Executor for Insert {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.fetched = false;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        if self.fetched {
            return Ok(None);
        }
        self.fetched = true;

        let mut count = 0;
        while let Some(mut t) = self.child.next()? {
            self.db
                .buffer_pool()
                .insert_tuple(&self.db, self.tid, self.table_id, &mut t)?;
            count += 1;
        }
        crate::quarry_debug_log!(
            "[Insert::next] inserted {} tuples into table {}",
            count,
            self.table_id
        );
        Ok(Some(count_tuple(&self.td, count)?))
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.fetched = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}

/// Deletes every child tuple from the table owning it, then emits a single
/// `(count)` tuple. A second `next` is end-of-stream.
pub struct Delete {
    db: Arc<Db>,
    tid: TransactionId,
    child: Box<dyn Executor>,
    td: TupleDesc,
    fetched: bool,
    opened: bool,
}

impl Delete {
    pub fn new(db: Arc<Db>, tid: TransactionId, child: Box<dyn Executor>) -> Delete {
        Delete {
            db,
            tid,
            child,
            td: count_desc("deleted"),
            fetched: false,
            opened: false,
        }
    }
}

impl Executor for Delete {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.fetched = false;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        if self.fetched {
            return Ok(None);
        }
        self.fetched = true;

        let mut count = 0;
        while let Some(t) = self.child.next()? {
            self.db.buffer_pool().delete_tuple(&self.db, self.tid, &t)?;
            count += 1;
        }
        crate::quarry_debug_log!("[Delete::next] deleted {} tuples", count);
        Ok(Some(count_tuple(&self.td, count)?))
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.fetched = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
