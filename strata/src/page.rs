//! Page identifiers and the heap page layout.

use bytes::BufMut;

use crate::btree_page::{
    BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreeRootPtrPage,
};
use crate::error::DbError;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple, TupleDesc};

/// The lock mode a caller requests when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// What kind of B+ tree page a `BTreePageId` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageCategory {
    RootPtr,
    Internal,
    Leaf,
    Header,
}

impl PageCategory {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            PageCategory::RootPtr => 0,
            PageCategory::Internal => 1,
            PageCategory::Leaf => 2,
            PageCategory::Header => 3,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Result<PageCategory, DbError> {
        match b {
            0 => Ok(PageCategory::RootPtr),
            1 => Ok(PageCategory::Internal),
            2 => Ok(PageCategory::Leaf),
            3 => Ok(PageCategory::Header),
            other => Err(DbError::Corrupt(format!("bad page category byte {}", other))),
        }
    }
}

/// Identifier of a heap file page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPageId {
    pub table_id: u32,
    pub page_no: usize,
}

impl HeapPageId {
    pub fn new(table_id: u32, page_no: usize) -> HeapPageId {
        HeapPageId { table_id, page_no }
    }
}

/// Identifier of a B+ tree file page. Page number 0 is reserved for the root
/// pointer; data pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BTreePageId {
    pub table_id: u32,
    pub page_no: usize,
    pub category: PageCategory,
}

impl BTreePageId {
    pub fn new(table_id: u32, page_no: usize, category: PageCategory) -> BTreePageId {
        BTreePageId {
            table_id,
            page_no,
            category,
        }
    }

    /// The id of the singleton root pointer page of a B+ tree file.
    pub fn root_ptr(table_id: u32) -> BTreePageId {
        BTreePageId::new(table_id, 0, PageCategory::RootPtr)
    }
}

/// A discriminated page identifier: which table, which page, and (for B+ tree
/// files) which kind of page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageId {
    Heap(HeapPageId),
    BTree(BTreePageId),
}

impl PageId {
    pub fn table_id(&self) -> u32 {
        match self {
            PageId::Heap(pid) => pid.table_id,
            PageId::BTree(pid) => pid.table_id,
        }
    }

    pub fn page_no(&self) -> usize {
        match self {
            PageId::Heap(pid) => pid.page_no,
            PageId::BTree(pid) => pid.page_no,
        }
    }
}

impl From<HeapPageId> for PageId {
    fn from(pid: HeapPageId) -> PageId {
        PageId::Heap(pid)
    }
}

impl From<BTreePageId> for PageId {
    fn from(pid: BTreePageId) -> PageId {
        PageId::BTree(pid)
    }
}

/// The in-memory image of any page, tagged by shape. Callers that need a
/// specific shape dispatch on the tag via the checked accessors.
#[derive(Debug, Clone)]
pub enum Page {
    Heap(HeapPage),
    Leaf(BTreeLeafPage),
    Internal(BTreeInternalPage),
    Header(BTreeHeaderPage),
    RootPtr(BTreeRootPtrPage),
}

impl Page {
    pub fn id(&self) -> PageId {
        match self {
            Page::Heap(p) => PageId::Heap(p.id()),
            Page::Leaf(p) => PageId::BTree(p.id()),
            Page::Internal(p) => PageId::BTree(p.id()),
            Page::Header(p) => PageId::BTree(p.id()),
            Page::RootPtr(p) => PageId::BTree(p.id()),
        }
    }

    /// Serialize to the page's fixed-size on-disk image.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Page::Heap(p) => p.serialize(),
            Page::Leaf(p) => p.serialize(),
            Page::Internal(p) => p.serialize(),
            Page::Header(p) => p.serialize(),
            Page::RootPtr(p) => p.serialize(),
        }
    }

    /// The transaction that dirtied this page, if any.
    pub fn dirtier(&self) -> Option<TransactionId> {
        match self {
            Page::Heap(p) => p.dirtier,
            Page::Leaf(p) => p.dirtier,
            Page::Internal(p) => p.dirtier,
            Page::Header(p) => p.dirtier,
            Page::RootPtr(p) => p.dirtier,
        }
    }

    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        match self {
            Page::Heap(p) => p.dirtier = dirtier,
            Page::Leaf(p) => p.dirtier = dirtier,
            Page::Internal(p) => p.dirtier = dirtier,
            Page::Header(p) => p.dirtier = dirtier,
            Page::RootPtr(p) => p.dirtier = dirtier,
        }
    }

    /// Snapshot the current image as the page's before-image.
    pub fn set_before_image(&mut self) {
        let image = self.serialize();
        match self {
            Page::Heap(p) => p.before_image = Some(image),
            Page::Leaf(p) => p.before_image = Some(image),
            Page::Internal(p) => p.before_image = Some(image),
            Page::Header(p) => p.before_image = Some(image),
            Page::RootPtr(p) => p.before_image = Some(image),
        }
    }

    pub fn before_image(&self) -> Option<&[u8]> {
        match self {
            Page::Heap(p) => p.before_image.as_deref(),
            Page::Leaf(p) => p.before_image.as_deref(),
            Page::Internal(p) => p.before_image.as_deref(),
            Page::Header(p) => p.before_image.as_deref(),
            Page::RootPtr(p) => p.before_image.as_deref(),
        }
    }

    pub fn as_heap(&self) -> Result<&HeapPage, DbError> {
        match self {
            Page::Heap(p) => Ok(p),
            other => Err(wrong_shape("heap", other)),
        }
    }

    pub fn as_heap_mut(&mut self) -> Result<&mut HeapPage, DbError> {
        match self {
            Page::Heap(p) => Ok(p),
            other => Err(wrong_shape("heap", other)),
        }
    }

    pub fn as_leaf(&self) -> Result<&BTreeLeafPage, DbError> {
        match self {
            Page::Leaf(p) => Ok(p),
            other => Err(wrong_shape("leaf", other)),
        }
    }

    pub fn as_leaf_mut(&mut self) -> Result<&mut BTreeLeafPage, DbError> {
        match self {
            Page::Leaf(p) => Ok(p),
            other => Err(wrong_shape("leaf", other)),
        }
    }

    pub fn as_internal(&self) -> Result<&BTreeInternalPage, DbError> {
        match self {
            Page::Internal(p) => Ok(p),
            other => Err(wrong_shape("internal", other)),
        }
    }

    pub fn as_internal_mut(&mut self) -> Result<&mut BTreeInternalPage, DbError> {
        match self {
            Page::Internal(p) => Ok(p),
            other => Err(wrong_shape("internal", other)),
        }
    }

    pub fn as_header(&self) -> Result<&BTreeHeaderPage, DbError> {
        match self {
            Page::Header(p) => Ok(p),
            other => Err(wrong_shape("header", other)),
        }
    }

    pub fn as_header_mut(&mut self) -> Result<&mut BTreeHeaderPage, DbError> {
        match self {
            Page::Header(p) => Ok(p),
            other => Err(wrong_shape("header", other)),
        }
    }

    pub fn as_root_ptr(&self) -> Result<&BTreeRootPtrPage, DbError> {
        match self {
            Page::RootPtr(p) => Ok(p),
            other => Err(wrong_shape("root pointer", other)),
        }
    }

    pub fn as_root_ptr_mut(&mut self) -> Result<&mut BTreeRootPtrPage, DbError> {
        match self {
            Page::RootPtr(p) => Ok(p),
            other => Err(wrong_shape("root pointer", other)),
        }
    }

    /// Parent of a B+ tree leaf or internal page.
    pub fn parent_id(&self) -> Result<BTreePageId, DbError> {
        match self {
            Page::Leaf(p) => Ok(p.parent_id()),
            Page::Internal(p) => Ok(p.parent_id()),
            other => Err(wrong_shape("leaf or internal", other)),
        }
    }

    /// Set the parent of a B+ tree leaf or internal page.
    pub fn set_parent_id(&mut self, parent: BTreePageId) -> Result<(), DbError> {
        match self {
            Page::Leaf(p) => {
                p.set_parent_id(parent);
                Ok(())
            }
            Page::Internal(p) => {
                p.set_parent_id(parent);
                Ok(())
            }
            other => Err(wrong_shape("leaf or internal", other)),
        }
    }
}

fn wrong_shape(wanted: &str, got: &Page) -> DbError {
    let actual = match got {
        Page::Heap(_) => "heap",
        Page::Leaf(_) => "leaf",
        Page::Internal(_) => "internal",
        Page::Header(_) => "header",
        Page::RootPtr(_) => "root pointer",
    };
    DbError::InvalidArgument(format!("expected a {} page, got a {} page", wanted, actual))
}

/// A heap page: a slot-occupancy bitmap followed by fixed-size tuple slots.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: HeapPageId,
    td: TupleDesc,
    page_size: usize,
    num_slots: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    pub(crate) dirtier: Option<TransactionId>,
    pub(crate) before_image: Option<Vec<u8>>,
}

impl HeapPage {
    /// Tuples that fit on one page: floor((page_size * 8) / (tuple bits + 1
    /// header bit)).
    pub fn slots_per_page(page_size: usize, td: &TupleDesc) -> usize {
        (page_size * 8) / (td.size() * 8 + 1)
    }

    fn header_size(num_slots: usize) -> usize {
        (num_slots + 7) / 8
    }

    /// Parse a page from its on-disk image.
    pub fn new(
        pid: HeapPageId,
        data: &[u8],
        td: &TupleDesc,
        page_size: usize,
    ) -> Result<HeapPage, DbError> {
        if data.len() != page_size {
            return Err(DbError::Corrupt(format!(
                "heap page image is {} bytes, expected {}",
                data.len(),
                page_size
            )));
        }
        let num_slots = Self::slots_per_page(page_size, td);
        let header_size = Self::header_size(num_slots);
        let header = data[..header_size].to_vec();

        let tuple_size = td.size();
        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            let used = header[slot / 8] & (1 << (slot % 8)) != 0;
            if used {
                let start = header_size + slot * tuple_size;
                let mut buf = &data[start..start + tuple_size];
                let mut t = Tuple::read_from(td, &mut buf)?;
                t.set_record_id(Some(RecordId::new(PageId::Heap(pid), slot)));
                tuples.push(Some(t));
            } else {
                tuples.push(None);
            }
        }

        Ok(HeapPage {
            pid,
            td: td.clone(),
            page_size,
            num_slots,
            header,
            tuples,
            dirtier: None,
            before_image: None,
        })
    }

    /// A zeroed page image: no slots occupied.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> HeapPageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&s| !self.is_slot_used(s)).count()
    }

    /// Insert into the first empty slot. Sets the tuple's RecordId.
    pub fn insert_tuple(&mut self, t: &mut Tuple) -> Result<(), DbError> {
        if t.tuple_desc() != &self.td {
            return Err(DbError::InvalidArgument(
                "tuple schema does not match page schema".to_string(),
            ));
        }
        let slot = (0..self.num_slots)
            .find(|&s| !self.is_slot_used(s))
            .ok_or(DbError::PageFull(PageId::Heap(self.pid)))?;
        t.set_record_id(Some(RecordId::new(PageId::Heap(self.pid), slot)));
        self.mark_slot_used(slot, true);
        self.tuples[slot] = Some(t.clone());
        Ok(())
    }

    /// Delete the tuple occupying the slot its RecordId names.
    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<(), DbError> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        if rid.page_id != PageId::Heap(self.pid) || rid.slot >= self.num_slots {
            return Err(DbError::TupleNotFound);
        }
        if !self.is_slot_used(rid.slot) {
            return Err(DbError::TupleNotFound);
        }
        self.mark_slot_used(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    /// Occupied tuples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_size);
        buf.put_slice(&self.header);
        let tuple_size = self.td.size();
        for t in &self.tuples {
            match t {
                Some(t) => t.write_to(&mut buf),
                None => buf.put_bytes(0, tuple_size),
            }
        }
        buf.resize(self.page_size, 0);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, FieldType};

    fn int_pair_desc() -> TupleDesc {
        TupleDesc::from_types(vec![FieldType::Int, FieldType::Int])
    }

    fn tuple(td: &TupleDesc, a: i32, b: i32) -> Tuple {
        let mut t = Tuple::new(td.clone());
        t.set_field(0, Field::Int(a)).unwrap();
        t.set_field(1, Field::Int(b)).unwrap();
        t
    }

    #[test]
    fn slot_count_follows_the_formula() {
        let td = int_pair_desc();
        // 8-byte tuples on a 4096-byte page: (4096*8) / (64 + 1) = 504.
        assert_eq!(HeapPage::slots_per_page(4096, &td), 504);
    }

    #[test]
    fn insert_sets_record_id_and_marks_slot() {
        let td = int_pair_desc();
        let pid = HeapPageId::new(7, 0);
        let data = HeapPage::empty_page_data(256);
        let mut page = HeapPage::new(pid, &data, &td, 256).unwrap();

        let mut t = tuple(&td, 1, 2);
        page.insert_tuple(&mut t).unwrap();

        let rid = t.record_id().unwrap();
        assert_eq!(rid.page_id, PageId::Heap(pid));
        assert!(page.is_slot_used(rid.slot));
        assert_eq!(page.iter().count(), 1);
    }

    #[test]
    fn serialize_round_trips() {
        let td = int_pair_desc();
        let pid = HeapPageId::new(7, 3);
        let data = HeapPage::empty_page_data(256);
        let mut page = HeapPage::new(pid, &data, &td, 256).unwrap();

        for i in 0..5 {
            let mut t = tuple(&td, i, i * 10);
            page.insert_tuple(&mut t).unwrap();
        }

        let image = page.serialize();
        assert_eq!(image.len(), 256);
        let reread = HeapPage::new(pid, &image, &td, 256).unwrap();
        assert_eq!(reread.num_empty_slots(), page.num_empty_slots());
        let original: Vec<_> = page.iter().cloned().collect();
        let parsed: Vec<_> = reread.iter().cloned().collect();
        assert_eq!(original, parsed);
    }

    #[test]
    fn delete_frees_the_slot() {
        let td = int_pair_desc();
        let pid = HeapPageId::new(7, 0);
        let data = HeapPage::empty_page_data(256);
        let mut page = HeapPage::new(pid, &data, &td, 256).unwrap();

        let mut t = tuple(&td, 1, 2);
        page.insert_tuple(&mut t).unwrap();
        let before = page.num_empty_slots();
        page.delete_tuple(&t).unwrap();
        assert_eq!(page.num_empty_slots(), before + 1);

        // A second delete of the same tuple is an error.
        assert!(page.delete_tuple(&t).is_err());
    }

    #[test]
    fn insert_on_full_page_fails() {
        let td = int_pair_desc();
        let pid = HeapPageId::new(1, 0);
        // 32-byte page: (256) / 65 = 3 slots.
        let data = HeapPage::empty_page_data(32);
        let mut page = HeapPage::new(pid, &data, &td, 32).unwrap();
        assert_eq!(page.num_slots(), 3);

        for i in 0..3 {
            let mut t = tuple(&td, i, i);
            page.insert_tuple(&mut t).unwrap();
        }
        let mut overflow = tuple(&td, 9, 9);
        assert!(matches!(
            page.insert_tuple(&mut overflow),
            Err(DbError::PageFull(_))
        ));
    }
}
