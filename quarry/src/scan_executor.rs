//! Scan operators over heap and B+ tree files.

use std::sync::Arc;

use strata::btree_file::IndexPredicate;
use strata::catalog::DbFileIterator;
use strata::tuple::{Tuple, TupleDesc};
use strata::{Db, TransactionId};

use crate::errors::ExecutionError;
use crate::executor::Executor;

/// Sequential scan over every live tuple of a table, in the order the
/// backing file yields them. The optional alias prefixes field names in the
/// scan's schema, so a self-join can tell its two sides apart.
pub struct SeqScan {
    iter: Box<dyn DbFileIterator>,
    td: TupleDesc,
    opened: bool,
}

impl SeqScan {
    pub fn new(
        db: Arc<Db>,
        tid: TransactionId,
        table_id: u32,
        alias: Option<&str>,
    ) -> Result<SeqScan, ExecutionError> {
        let file = db.catalog().get_database_file(table_id)?;
        let base = file.tuple_desc().clone();
        let td = match alias {
            Some(alias) => aliased(&base, alias)?,
            None => base,
        };
        let iter = file.iterator(Arc::clone(&db), tid);
        Ok(SeqScan {
            iter,
            td,
            opened: false,
        })
    }
}

fn aliased(td: &TupleDesc, alias: &str) -> Result<TupleDesc, ExecutionError> {
    let mut types = Vec::with_capacity(td.num_fields());
    let mut names = Vec::with_capacity(td.num_fields());
    for i in 0..td.num_fields() {
        types.push(td.field_type(i)?);
        names.push(td.field_name(i)?.map(|n| format!("{}.{}", alias, n)));
    }
    Ok(TupleDesc::new(types, names))
}

impl Executor for SeqScan {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.iter.open()?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        Ok(self.iter.next()?)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        self.iter.rewind()?;
        Ok(())
    }

    fn close(&mut self) {
        self.iter.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}

/// Index scan over a B+ tree file: yields tuples whose key satisfies the
/// predicate, in key order (or reverse key order), stopping as soon as the
/// traversal direction can no longer produce a match.
pub struct IndexScan {
    iter: Box<dyn DbFileIterator>,
    td: TupleDesc,
    opened: bool,
}

impl IndexScan {
    pub fn new(
        db: Arc<Db>,
        tid: TransactionId,
        table_id: u32,
        predicate: IndexPredicate,
        reverse: bool,
    ) -> Result<IndexScan, ExecutionError> {
        let file = db.catalog().get_database_file(table_id)?;
        let td = file.tuple_desc().clone();
        let btree = file.as_btree()?;
        let iter: Box<dyn DbFileIterator> = if reverse {
            Box::new(btree.index_reverse_iterator(Arc::clone(&db), tid, predicate))
        } else {
            Box::new(btree.index_iterator(Arc::clone(&db), tid, predicate))
        };
        Ok(IndexScan {
            iter,
            td,
            opened: false,
        })
    }
}

impl Executor for IndexScan {
    fn open(&mut self) -> Result<(), ExecutionError> {
        self.iter.open()?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        Ok(self.iter.next()?)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::IteratorNotOpen);
        }
        self.iter.rewind()?;
        Ok(())
    }

    fn close(&mut self) {
        self.iter.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
