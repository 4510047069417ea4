//! On-disk layouts of the four B+ tree page kinds.

use bytes::{Buf, BufMut};

use crate::error::DbError;
use crate::page::{BTreePageId, PageCategory, PageId};
use crate::transaction::TransactionId;
use crate::tuple::{Field, Op, RecordId, Tuple, TupleDesc};

/// Bytes occupied by a page-number pointer.
const INDEX_SIZE: usize = 4;

/// An entry in an internal page: a key and the two children it separates.
/// Adjacent entries on a page share a child. An entry iterated out of a page
/// remembers its slot so updates and deletes can address it.
#[derive(Debug, Clone)]
pub struct BTreeEntry {
    key: Field,
    left_child: BTreePageId,
    right_child: BTreePageId,
    slot: Option<usize>,
}

impl BTreeEntry {
    pub fn new(key: Field, left_child: BTreePageId, right_child: BTreePageId) -> BTreeEntry {
        BTreeEntry {
            key,
            left_child,
            right_child,
            slot: None,
        }
    }

    pub fn key(&self) -> &Field {
        &self.key
    }

    pub fn set_key(&mut self, key: Field) {
        self.key = key;
    }

    pub fn left_child(&self) -> BTreePageId {
        self.left_child
    }

    pub fn set_left_child(&mut self, pid: BTreePageId) {
        self.left_child = pid;
    }

    pub fn right_child(&self) -> BTreePageId {
        self.right_child
    }

    pub fn set_right_child(&mut self, pid: BTreePageId) {
        self.right_child = pid;
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        self.slot
    }
}

/// A leaf page: tuples sorted by the key field, chained to its siblings.
///
/// Layout: parent page_no (4) | left sibling page_no (4) | right sibling
/// page_no (4) | slot bitmap | tuple slots | zero padding. Page number 0 is
/// the "none" sentinel for all three pointers.
#[derive(Debug, Clone)]
pub struct BTreeLeafPage {
    pid: BTreePageId,
    td: TupleDesc,
    key_field: usize,
    page_size: usize,
    max_tuples: usize,
    parent: usize,
    left_sibling: usize,
    right_sibling: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    pub(crate) dirtier: Option<TransactionId>,
    pub(crate) before_image: Option<Vec<u8>>,
}

impl BTreeLeafPage {
    pub fn max_tuples(page_size: usize, td: &TupleDesc) -> usize {
        (page_size * 8 - 3 * INDEX_SIZE * 8) / (td.size() * 8 + 1)
    }

    fn header_size(max_tuples: usize) -> usize {
        (max_tuples + 7) / 8
    }

    pub fn new(
        pid: BTreePageId,
        data: &[u8],
        td: &TupleDesc,
        key_field: usize,
        page_size: usize,
    ) -> Result<BTreeLeafPage, DbError> {
        if data.len() != page_size {
            return Err(DbError::Corrupt(format!(
                "leaf page image is {} bytes, expected {}",
                data.len(),
                page_size
            )));
        }
        let max_tuples = Self::max_tuples(page_size, td);
        let header_size = Self::header_size(max_tuples);

        let mut buf = &data[..];
        let parent = buf.get_u32() as usize;
        let left_sibling = buf.get_u32() as usize;
        let right_sibling = buf.get_u32() as usize;
        let header = buf[..header_size].to_vec();
        buf.advance(header_size);

        let tuple_size = td.size();
        let mut tuples = Vec::with_capacity(max_tuples);
        for slot in 0..max_tuples {
            let used = header[slot / 8] & (1 << (slot % 8)) != 0;
            let mut slot_buf = &buf[slot * tuple_size..(slot + 1) * tuple_size];
            if used {
                let mut t = Tuple::read_from(td, &mut slot_buf)?;
                t.set_record_id(Some(RecordId::new(PageId::BTree(pid), slot)));
                tuples.push(Some(t));
            } else {
                tuples.push(None);
            }
        }

        Ok(BTreeLeafPage {
            pid,
            td: td.clone(),
            key_field,
            page_size,
            max_tuples,
            parent,
            left_sibling,
            right_sibling,
            header,
            tuples,
            dirtier: None,
            before_image: None,
        })
    }

    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> BTreePageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    pub fn key_field(&self) -> usize {
        self.key_field
    }

    /// The parent: an internal page, or the root pointer when this leaf is
    /// the root.
    pub fn parent_id(&self) -> BTreePageId {
        if self.parent == 0 {
            BTreePageId::root_ptr(self.pid.table_id)
        } else {
            BTreePageId::new(self.pid.table_id, self.parent, PageCategory::Internal)
        }
    }

    pub fn set_parent_id(&mut self, parent: BTreePageId) {
        self.parent = match parent.category {
            PageCategory::RootPtr => 0,
            _ => parent.page_no,
        };
    }

    pub fn left_sibling_id(&self) -> Option<BTreePageId> {
        (self.left_sibling != 0).then(|| {
            BTreePageId::new(self.pid.table_id, self.left_sibling, PageCategory::Leaf)
        })
    }

    pub fn set_left_sibling_id(&mut self, pid: Option<BTreePageId>) {
        self.left_sibling = pid.map_or(0, |p| p.page_no);
    }

    pub fn right_sibling_id(&self) -> Option<BTreePageId> {
        (self.right_sibling != 0).then(|| {
            BTreePageId::new(self.pid.table_id, self.right_sibling, PageCategory::Leaf)
        })
    }

    pub fn set_right_sibling_id(&mut self, pid: Option<BTreePageId>) {
        self.right_sibling = pid.map_or(0, |p| p.page_no);
    }

    pub fn capacity(&self) -> usize {
        self.max_tuples
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.max_tuples && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn num_tuples(&self) -> usize {
        (0..self.max_tuples).filter(|&s| self.is_slot_used(s)).count()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.max_tuples - self.num_tuples()
    }

    fn key_of(&self, slot: usize) -> Result<&Field, DbError> {
        match &self.tuples[slot] {
            Some(t) => t.field(self.key_field),
            None => Err(DbError::Corrupt(format!(
                "slot {} marked used but holds no tuple",
                slot
            ))),
        }
    }

    // Shift a record into an adjacent free slot, keeping its RecordId
    // current.
    fn move_record(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            if let Some(mut t) = self.tuples[from].take() {
                t.set_record_id(Some(RecordId::new(PageId::BTree(self.pid), to)));
                self.mark_slot_used(from, false);
                self.mark_slot_used(to, true);
                self.tuples[to] = Some(t);
            }
        }
    }

    /// Insert keeping slots sorted by the key field: find the empty slot,
    /// find where the tuple belongs, and shift the records in between toward
    /// the empty slot.
    pub fn insert_tuple(&mut self, t: &mut Tuple) -> Result<(), DbError> {
        if t.tuple_desc() != &self.td {
            return Err(DbError::InvalidArgument(
                "tuple schema does not match page schema".to_string(),
            ));
        }
        let empty_slot = (0..self.max_tuples)
            .find(|&s| !self.is_slot_used(s))
            .ok_or(DbError::PageFull(PageId::BTree(self.pid)))?;

        let key = t.field(self.key_field)?.clone();
        let mut less_or_eq: Option<usize> = None;
        for slot in 0..self.max_tuples {
            if self.is_slot_used(slot) {
                if self.key_of(slot)?.compare(Op::LessThanOrEq, &key)? {
                    less_or_eq = Some(slot);
                } else {
                    break;
                }
            }
        }

        let good_slot = match less_or_eq {
            Some(le) if empty_slot < le => {
                for i in empty_slot + 1..=le {
                    self.move_record(i, i - 1);
                }
                le
            }
            Some(le) => {
                for i in (le + 1..empty_slot).rev() {
                    self.move_record(i, i + 1);
                }
                le + 1
            }
            None => {
                for i in (0..empty_slot).rev() {
                    self.move_record(i, i + 1);
                }
                0
            }
        };

        t.set_record_id(Some(RecordId::new(PageId::BTree(self.pid), good_slot)));
        self.mark_slot_used(good_slot, true);
        self.tuples[good_slot] = Some(t.clone());
        Ok(())
    }

    /// Delete the tuple occupying the slot its RecordId names.
    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<(), DbError> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        if rid.page_id != PageId::BTree(self.pid) || rid.slot >= self.max_tuples {
            return Err(DbError::TupleNotFound);
        }
        if !self.is_slot_used(rid.slot) {
            return Err(DbError::TupleNotFound);
        }
        self.mark_slot_used(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    /// Occupied tuples in slot (key) order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }

    /// Occupied tuples in reverse key order.
    pub fn rev_iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().rev().filter_map(|t| t.as_ref())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_size);
        buf.put_u32(self.parent as u32);
        buf.put_u32(self.left_sibling as u32);
        buf.put_u32(self.right_sibling as u32);
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

/// An internal page: sorted keys separating child pointers.
///
/// Layout: parent page_no (4) | child category (1) | slot bitmap over
/// `max_entries + 1` slots | slot array of child page_no (4) + key bytes.
/// Slot 0 carries only its child pointer; its key area is unused. A page
/// with m entries uses slots 0..=m and therefore holds m + 1 child pointers.
#[derive(Debug, Clone)]
pub struct BTreeInternalPage {
    pid: BTreePageId,
    td: TupleDesc,
    key_field: usize,
    page_size: usize,
    max_entries: usize,
    parent: usize,
    child_category: PageCategory,
    header: Vec<u8>,
    keys: Vec<Option<Field>>,
    children: Vec<usize>,
    pub(crate) dirtier: Option<TransactionId>,
    pub(crate) before_image: Option<Vec<u8>>,
}

impl BTreeInternalPage {
    pub fn max_entries(page_size: usize, key_size: usize) -> usize {
        // parent pointer + category byte up front, one slot bit plus a
        // child pointer and key per slot, one extra slot for the leading
        // child pointer.
        (page_size * 8 - (INDEX_SIZE + 1) * 8) / ((key_size + INDEX_SIZE) * 8 + 1) - 1
    }

    fn num_slots(&self) -> usize {
        self.max_entries + 1
    }

    fn header_size(max_entries: usize) -> usize {
        (max_entries + 1 + 7) / 8
    }

    pub fn new(
        pid: BTreePageId,
        data: &[u8],
        td: &TupleDesc,
        key_field: usize,
        page_size: usize,
    ) -> Result<BTreeInternalPage, DbError> {
        if data.len() != page_size {
            return Err(DbError::Corrupt(format!(
                "internal page image is {} bytes, expected {}",
                data.len(),
                page_size
            )));
        }
        let key_type = td.field_type(key_field)?;
        let key_size = key_type.len();
        let max_entries = Self::max_entries(page_size, key_size);
        let header_size = Self::header_size(max_entries);

        let mut buf = &data[..];
        let parent = buf.get_u32() as usize;
        let child_category = PageCategory::from_byte(buf.get_u8())?;
        let header = buf[..header_size].to_vec();
        buf.advance(header_size);

        let mut keys = Vec::with_capacity(max_entries + 1);
        let mut children = Vec::with_capacity(max_entries + 1);
        for slot in 0..max_entries + 1 {
            let used = header[slot / 8] & (1 << (slot % 8)) != 0;
            let child = buf.get_u32() as usize;
            if used && slot > 0 {
                keys.push(Some(Field::read_from(key_type, &mut buf)?));
            } else {
                buf.advance(key_size);
                keys.push(None);
            }
            children.push(if used { child } else { 0 });
        }

        Ok(BTreeInternalPage {
            pid,
            td: td.clone(),
            key_field,
            page_size,
            max_entries,
            parent,
            child_category,
            header,
            keys,
            children,
            dirtier: None,
            before_image: None,
        })
    }

    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> BTreePageId {
        self.pid
    }

    pub fn parent_id(&self) -> BTreePageId {
        if self.parent == 0 {
            BTreePageId::root_ptr(self.pid.table_id)
        } else {
            BTreePageId::new(self.pid.table_id, self.parent, PageCategory::Internal)
        }
    }

    pub fn set_parent_id(&mut self, parent: BTreePageId) {
        self.parent = match parent.category {
            PageCategory::RootPtr => 0,
            _ => parent.page_no,
        };
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// Number of entries (keys). The leading child pointer in slot 0 does
    /// not count.
    pub fn num_entries(&self) -> usize {
        (1..self.num_slots()).filter(|&s| self.is_slot_used(s)).count()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.max_entries - self.num_entries()
    }

    fn child_id(&self, slot: usize) -> BTreePageId {
        BTreePageId::new(self.pid.table_id, self.children[slot], self.child_category)
    }

    /// Entries in key order. Adjacent entries share a child pointer.
    pub fn iter(&self) -> Vec<BTreeEntry> {
        let mut entries = Vec::new();
        let mut prev_slot: Option<usize> = None;
        for slot in 0..self.num_slots() {
            if !self.is_slot_used(slot) {
                continue;
            }
            if slot > 0 {
                if let (Some(prev), Some(key)) = (prev_slot, self.keys[slot].clone()) {
                    let mut e = BTreeEntry::new(key, self.child_id(prev), self.child_id(slot));
                    e.slot = Some(slot);
                    entries.push(e);
                }
            }
            prev_slot = Some(slot);
        }
        entries
    }

    /// Entries in reverse key order.
    pub fn rev_iter(&self) -> Vec<BTreeEntry> {
        let mut entries = self.iter();
        entries.reverse();
        entries
    }

    /// Insert an entry in sorted position. The entry must share one of its
    /// children with an entry already on the page (or the page must be
    /// empty).
    pub fn insert_entry(&mut self, e: &mut BTreeEntry) -> Result<(), DbError> {
        let key_type = self.td.field_type(self.key_field)?;
        if e.key.field_type() != key_type {
            return Err(DbError::InvalidArgument(format!(
                "entry key type {:?} does not match index key type {:?}",
                e.key.field_type(),
                key_type
            )));
        }

        // First entry on the page establishes the child category.
        if self.num_entries() == 0 && !self.is_slot_used(0) {
            self.child_category = e.left_child.category;
            self.children[0] = e.left_child.page_no;
            self.children[1] = e.right_child.page_no;
            self.keys[1] = Some(e.key.clone());
            self.mark_slot_used(0, true);
            self.mark_slot_used(1, true);
            e.slot = Some(1);
            return Ok(());
        }

        let empty_slot = (1..self.num_slots())
            .find(|&s| !self.is_slot_used(s))
            .ok_or(DbError::PageFull(PageId::BTree(self.pid)))?;

        // Find the slot holding the child this entry hangs off of, and
        // splice the entry's left child in its place.
        let mut less_or_eq: Option<usize> = None;
        for slot in 0..self.num_slots() {
            if !self.is_slot_used(slot) {
                continue;
            }
            if self.children[slot] == e.left_child.page_no
                || self.children[slot] == e.right_child.page_no
            {
                if slot > 0 {
                    if let Some(key) = &self.keys[slot] {
                        if key.compare(Op::GreaterThan, &e.key)? {
                            return Err(DbError::InvalidArgument(
                                "entry key is out of order with its shared child".to_string(),
                            ));
                        }
                    }
                }
                less_or_eq = Some(slot);
                if self.children[slot] == e.right_child.page_no {
                    self.children[slot] = e.left_child.page_no;
                }
            } else if less_or_eq.is_some() {
                if let Some(key) = &self.keys[slot] {
                    if key.compare(Op::LessThan, &e.key)? {
                        return Err(DbError::InvalidArgument(
                            "entry key is out of order with the following entry".to_string(),
                        ));
                    }
                }
                break;
            }
        }

        let less_or_eq = less_or_eq.ok_or_else(|| {
            DbError::InvalidArgument(
                "entry shares no child with any entry on the page".to_string(),
            )
        })?;

        let good_slot = if empty_slot < less_or_eq {
            for i in empty_slot + 1..=less_or_eq {
                self.move_entry(i, i - 1);
            }
            less_or_eq
        } else {
            for i in (less_or_eq + 1..empty_slot).rev() {
                self.move_entry(i, i + 1);
            }
            less_or_eq + 1
        };

        self.mark_slot_used(good_slot, true);
        self.keys[good_slot] = Some(e.key.clone());
        self.children[good_slot] = e.right_child.page_no;
        e.slot = Some(good_slot);
        Ok(())
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            self.keys[to] = self.keys[from].take();
            self.children[to] = self.children[from];
            self.children[from] = 0;
            self.mark_slot_used(from, false);
            self.mark_slot_used(to, true);
        }
    }

    fn entry_slot(&self, e: &BTreeEntry) -> Result<usize, DbError> {
        let slot = e
            .slot
            .ok_or_else(|| DbError::InvalidArgument("entry was never on a page".to_string()))?;
        if slot == 0 || slot >= self.num_slots() || !self.is_slot_used(slot) {
            return Err(DbError::TupleNotFound);
        }
        Ok(slot)
    }

    /// Delete the entry's key and right child pointer.
    pub fn delete_key_and_right_child(&mut self, e: &BTreeEntry) -> Result<(), DbError> {
        let slot = self.entry_slot(e)?;
        self.mark_slot_used(slot, false);
        self.keys[slot] = None;
        self.children[slot] = 0;
        Ok(())
    }

    /// Delete the entry's key and left child pointer: the right child takes
    /// over the preceding slot's pointer position.
    pub fn delete_key_and_left_child(&mut self, e: &BTreeEntry) -> Result<(), DbError> {
        let slot = self.entry_slot(e)?;
        for prev in (0..slot).rev() {
            if self.is_slot_used(prev) {
                self.children[prev] = self.children[slot];
                self.mark_slot_used(slot, false);
                self.keys[slot] = None;
                self.children[slot] = 0;
                return Ok(());
            }
        }
        Err(DbError::Corrupt(
            "entry has no preceding child pointer".to_string(),
        ))
    }

    /// Replace the key and right child of the entry's slot.
    pub fn update_entry(&mut self, e: &BTreeEntry) -> Result<(), DbError> {
        let slot = self.entry_slot(e)?;
        self.keys[slot] = Some(e.key.clone());
        self.children[slot] = e.right_child.page_no;
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_size);
        buf.put_u32(self.parent as u32);
        buf.put_u8(self.child_category.to_byte());
        buf.put_slice(&self.header);
        let key_size = self
            .td
            .field_type(self.key_field)
            .map(|t| t.len())
            .unwrap_or(0);
        for slot in 0..self.num_slots() {
            buf.put_u32(self.children[slot] as u32);
            match &self.keys[slot] {
                Some(key) if slot > 0 && self.is_slot_used(slot) => key.write_to(&mut buf),
                _ => buf.put_bytes(0, key_size),
            }
        }
        buf.resize(self.page_size, 0);
        buf
    }
}

/// A header page: a bitmap recording which data pages of the file are in
/// use, chained into a doubly linked list of header pages.
///
/// Layout: prev header page_no (4) | next header page_no (4) | bitmap.
#[derive(Debug, Clone)]
pub struct BTreeHeaderPage {
    pid: BTreePageId,
    page_size: usize,
    prev: usize,
    next: usize,
    bitmap: Vec<u8>,
    pub(crate) dirtier: Option<TransactionId>,
    pub(crate) before_image: Option<Vec<u8>>,
}

impl BTreeHeaderPage {
    /// Data-page slots tracked per header page.
    pub fn num_slots(page_size: usize) -> usize {
        (page_size - 2 * INDEX_SIZE) * 8
    }

    pub fn new(
        pid: BTreePageId,
        data: &[u8],
        page_size: usize,
    ) -> Result<BTreeHeaderPage, DbError> {
        if data.len() != page_size {
            return Err(DbError::Corrupt(format!(
                "header page image is {} bytes, expected {}",
                data.len(),
                page_size
            )));
        }
        let mut buf = &data[..];
        let prev = buf.get_u32() as usize;
        let next = buf.get_u32() as usize;
        let bitmap = buf.to_vec();
        Ok(BTreeHeaderPage {
            pid,
            page_size,
            prev,
            next,
            bitmap,
            dirtier: None,
            before_image: None,
        })
    }

    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn id(&self) -> BTreePageId {
        self.pid
    }

    /// Mark every slot in use. A fresh header page tracks pages that all
    /// predate free-list accounting.
    pub fn init(&mut self) {
        for byte in self.bitmap.iter_mut() {
            *byte = 0xff;
        }
    }

    pub fn prev_page_id(&self) -> Option<BTreePageId> {
        (self.prev != 0)
            .then(|| BTreePageId::new(self.pid.table_id, self.prev, PageCategory::Header))
    }

    pub fn set_prev_page_id(&mut self, pid: Option<BTreePageId>) {
        self.prev = pid.map_or(0, |p| p.page_no);
    }

    pub fn next_page_id(&self) -> Option<BTreePageId> {
        (self.next != 0)
            .then(|| BTreePageId::new(self.pid.table_id, self.next, PageCategory::Header))
    }

    pub fn set_next_page_id(&mut self, pid: Option<BTreePageId>) {
        self.next = pid.map_or(0, |p| p.page_no);
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.bitmap[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.bitmap[slot / 8] |= 1 << (slot % 8);
        } else {
            self.bitmap[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// The first free slot on this header page, if any.
    pub fn get_empty_slot(&self) -> Option<usize> {
        (0..Self::num_slots(self.page_size)).find(|&s| !self.is_slot_used(s))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_size);
        buf.put_u32(self.prev as u32);
        buf.put_u32(self.next as u32);
        buf.put_slice(&self.bitmap);
        buf.resize(self.page_size, 0);
        buf
    }
}

/// The singleton page at byte 0 of a B+ tree file: the root's page number
/// and category, and the head of the header-page chain. Always
/// [`BTreeRootPtrPage::PAGE_SIZE`] bytes, independent of the data page size.
#[derive(Debug, Clone)]
pub struct BTreeRootPtrPage {
    table_id: u32,
    root: usize,
    root_category: PageCategory,
    header: usize,
    pub(crate) dirtier: Option<TransactionId>,
    pub(crate) before_image: Option<Vec<u8>>,
}

impl BTreeRootPtrPage {
    /// root page_no (4) + root category (1) + first header page_no (4).
    pub const PAGE_SIZE: usize = 9;

    pub fn new(table_id: u32, data: &[u8]) -> Result<BTreeRootPtrPage, DbError> {
        if data.len() != Self::PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "root pointer image is {} bytes, expected {}",
                data.len(),
                Self::PAGE_SIZE
            )));
        }
        let mut buf = data;
        let root = buf.get_u32() as usize;
        let category_byte = buf.get_u8();
        let root_category = if root == 0 {
            PageCategory::Leaf
        } else {
            PageCategory::from_byte(category_byte)?
        };
        let header = buf.get_u32() as usize;
        Ok(BTreeRootPtrPage {
            table_id,
            root,
            root_category,
            header,
            dirtier: None,
            before_image: None,
        })
    }

    pub fn empty_page_data() -> Vec<u8> {
        vec![0u8; Self::PAGE_SIZE]
    }

    pub fn id(&self) -> BTreePageId {
        BTreePageId::root_ptr(self.table_id)
    }

    pub fn root_id(&self) -> Option<BTreePageId> {
        (self.root != 0)
            .then(|| BTreePageId::new(self.table_id, self.root, self.root_category))
    }

    pub fn set_root_id(&mut self, pid: BTreePageId) {
        self.root = pid.page_no;
        self.root_category = pid.category;
    }

    pub fn header_id(&self) -> Option<BTreePageId> {
        (self.header != 0)
            .then(|| BTreePageId::new(self.table_id, self.header, PageCategory::Header))
    }

    pub fn set_header_id(&mut self, pid: BTreePageId) {
        self.header = pid.page_no;
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PAGE_SIZE);
        buf.put_u32(self.root as u32);
        buf.put_u8(self.root_category.to_byte());
        buf.put_u32(self.header as u32);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::FieldType;

    fn key_desc() -> TupleDesc {
        TupleDesc::from_types(vec![FieldType::Int])
    }

    fn leaf(page_size: usize) -> BTreeLeafPage {
        let pid = BTreePageId::new(42, 1, PageCategory::Leaf);
        let data = BTreeLeafPage::empty_page_data(page_size);
        BTreeLeafPage::new(pid, &data, &key_desc(), 0, page_size).unwrap()
    }

    fn key_tuple(k: i32) -> Tuple {
        let mut t = Tuple::new(key_desc());
        t.set_field(0, Field::Int(k)).unwrap();
        t
    }

    #[test]
    fn leaf_capacity_formula() {
        // 28-byte page, 4-byte tuples: (224 - 96) / 33 = 3.
        assert_eq!(BTreeLeafPage::max_tuples(28, &key_desc()), 3);
    }

    #[test]
    fn leaf_insert_keeps_sorted_order() {
        let mut page = leaf(64);
        for k in [30, 10, 20, 25] {
            let mut t = key_tuple(k);
            page.insert_tuple(&mut t).unwrap();
        }
        let keys: Vec<i32> = page
            .iter()
            .map(|t| match t.field(0).unwrap() {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![10, 20, 25, 30]);

        let rev: Vec<i32> = page
            .rev_iter()
            .map(|t| match t.field(0).unwrap() {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(rev, vec![30, 25, 20, 10]);
    }

    #[test]
    fn leaf_serialize_round_trips_with_siblings() {
        let mut page = leaf(64);
        page.set_left_sibling_id(Some(BTreePageId::new(42, 5, PageCategory::Leaf)));
        page.set_right_sibling_id(Some(BTreePageId::new(42, 6, PageCategory::Leaf)));
        page.set_parent_id(BTreePageId::new(42, 2, PageCategory::Internal));
        for k in [3, 1, 2] {
            let mut t = key_tuple(k);
            page.insert_tuple(&mut t).unwrap();
        }

        let image = page.serialize();
        let reread = BTreeLeafPage::new(page.id(), &image, &key_desc(), 0, 64).unwrap();
        assert_eq!(reread.num_tuples(), 3);
        assert_eq!(reread.left_sibling_id(), page.left_sibling_id());
        assert_eq!(reread.right_sibling_id(), page.right_sibling_id());
        assert_eq!(reread.parent_id(), page.parent_id());
    }

    fn internal(page_size: usize) -> BTreeInternalPage {
        let pid = BTreePageId::new(42, 9, PageCategory::Internal);
        let data = BTreeInternalPage::empty_page_data(page_size);
        BTreeInternalPage::new(pid, &data, &key_desc(), 0, page_size).unwrap()
    }

    fn leaf_pid(no: usize) -> BTreePageId {
        BTreePageId::new(42, no, PageCategory::Leaf)
    }

    #[test]
    fn internal_insert_and_iterate() {
        let mut page = internal(128);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let entries = page.iter();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key(), &Field::Int(10));
        assert_eq!(entries[0].left_child(), leaf_pid(1));
        assert_eq!(entries[0].right_child(), leaf_pid(2));
        assert_eq!(entries[1].right_child(), leaf_pid(3));
        assert_eq!(page.num_entries(), 2);
    }

    #[test]
    fn internal_entry_rejects_disconnected_child() {
        let mut page = internal(128);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();

        // Shares no child with anything on the page.
        let mut stray = BTreeEntry::new(Field::Int(30), leaf_pid(8), leaf_pid(9));
        assert!(page.insert_entry(&mut stray).is_err());
    }

    #[test]
    fn internal_delete_right_then_left_child() {
        let mut page = internal(128);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let entries = page.iter();
        page.delete_key_and_right_child(&entries[1]).unwrap();
        assert_eq!(page.num_entries(), 1);

        let remaining = page.iter();
        page.delete_key_and_left_child(&remaining[0]).unwrap();
        assert_eq!(page.num_entries(), 0);
        // The surviving child pointer is the old right child.
        assert!(page.is_slot_used(0));
    }

    #[test]
    fn internal_serialize_round_trips() {
        let mut page = internal(128);
        let mut e1 = BTreeEntry::new(Field::Int(10), leaf_pid(1), leaf_pid(2));
        page.insert_entry(&mut e1).unwrap();
        let mut e2 = BTreeEntry::new(Field::Int(20), leaf_pid(2), leaf_pid(3));
        page.insert_entry(&mut e2).unwrap();

        let image = page.serialize();
        let reread = BTreeInternalPage::new(page.id(), &image, &key_desc(), 0, 128).unwrap();
        assert_eq!(reread.num_entries(), 2);
        let entries = reread.iter();
        assert_eq!(entries[0].key(), &Field::Int(10));
        assert_eq!(entries[1].key(), &Field::Int(20));
        assert_eq!(entries[0].left_child(), leaf_pid(1));
        assert_eq!(entries[1].right_child(), leaf_pid(3));
    }

    #[test]
    fn header_page_tracks_free_slots() {
        let pid = BTreePageId::new(42, 4, PageCategory::Header);
        let data = BTreeHeaderPage::empty_page_data(64);
        let mut page = BTreeHeaderPage::new(pid, &data, 64).unwrap();
        page.init();
        assert_eq!(page.get_empty_slot(), None);

        page.mark_slot_used(17, false);
        assert_eq!(page.get_empty_slot(), Some(17));

        let image = page.serialize();
        let reread = BTreeHeaderPage::new(pid, &image, 64).unwrap();
        assert_eq!(reread.get_empty_slot(), Some(17));
    }

    #[test]
    fn root_ptr_round_trips() {
        let mut page = BTreeRootPtrPage::new(42, &BTreeRootPtrPage::empty_page_data()).unwrap();
        assert_eq!(page.root_id(), None);
        assert_eq!(page.header_id(), None);

        page.set_root_id(BTreePageId::new(42, 3, PageCategory::Internal));
        page.set_header_id(BTreePageId::new(42, 7, PageCategory::Header));

        let image = page.serialize();
        assert_eq!(image.len(), BTreeRootPtrPage::PAGE_SIZE);
        let reread = BTreeRootPtrPage::new(42, &image).unwrap();
        assert_eq!(
            reread.root_id(),
            Some(BTreePageId::new(42, 3, PageCategory::Internal))
        );
        assert_eq!(
            reread.header_id(),
            Some(BTreePageId::new(42, 7, PageCategory::Header))
        );
    }
}
