//! Tuples, schemas and typed field values.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::DbError;
use crate::page::PageId;

/// Maximum number of bytes in the body of a string field. Strings are stored
/// as a 4-byte length followed by a body padded to this size, so every string
/// field occupies the same number of bytes on disk.
pub const STRING_LEN: usize = 128;

/// The type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// Number of bytes a field of this type occupies on disk.
    pub fn len(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }
}

/// Comparison operators over fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEq,
    GreaterThan,
    GreaterThanOrEq,
}

/// A typed, immutable field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Compare this field against `other` under `op`. Fields of different
    /// types do not have an ordering.
    pub fn compare(&self, op: Op, other: &Field) -> Result<bool, DbError> {
        let ord = match (self, other) {
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Str(a), Field::Str(b)) => a.cmp(b),
            _ => {
                return Err(DbError::InvalidArgument(format!(
                    "cannot compare {:?} against {:?}",
                    self.field_type(),
                    other.field_type()
                )))
            }
        };
        Ok(match op {
            Op::Equals => ord.is_eq(),
            Op::NotEquals => ord.is_ne(),
            Op::LessThan => ord.is_lt(),
            Op::LessThanOrEq => ord.is_le(),
            Op::GreaterThan => ord.is_gt(),
            Op::GreaterThanOrEq => ord.is_ge(),
        })
    }

    /// Ordering against another field of the same type. Used by sorts, where
    /// both sides come from the same column.
    pub fn cmp_same_type(&self, other: &Field) -> std::cmp::Ordering {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Str(a), Field::Str(b)) => a.cmp(b),
            (Field::Int(_), Field::Str(_)) => std::cmp::Ordering::Less,
            (Field::Str(_), Field::Int(_)) => std::cmp::Ordering::Greater,
        }
    }

    /// Serialize this field into `buf` using its fixed on-disk size.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(STRING_LEN);
                buf.put_u32(len as u32);
                buf.put_slice(&bytes[..len]);
                buf.put_bytes(0, STRING_LEN - len);
            }
        }
    }

    /// Parse a field of type `ft` from `buf`, consuming exactly `ft.len()`
    /// bytes.
    pub fn read_from<B: Buf>(ft: FieldType, buf: &mut B) -> Result<Field, DbError> {
        match ft {
            FieldType::Int => Ok(Field::Int(buf.get_i32())),
            FieldType::Str => {
                let len = buf.get_u32() as usize;
                if len > STRING_LEN {
                    return Err(DbError::Corrupt(format!(
                        "string field length {} exceeds maximum {}",
                        len, STRING_LEN
                    )));
                }
                let mut body = vec![0u8; STRING_LEN];
                buf.copy_to_slice(&mut body);
                body.truncate(len);
                let s = String::from_utf8(body)
                    .map_err(|e| DbError::Corrupt(format!("string field not utf-8: {}", e)))?;
                Ok(Field::Str(s))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone)]
struct TdItem {
    field_type: FieldType,
    name: Option<String>,
}

/// The schema of a tuple: an ordered list of field types with optional names.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    /// Build a schema from parallel type and name arrays.
    pub fn new(types: Vec<FieldType>, names: Vec<Option<String>>) -> TupleDesc {
        let items = types
            .into_iter()
            .zip(names)
            .map(|(field_type, name)| TdItem { field_type, name })
            .collect();
        TupleDesc { items }
    }

    /// Build an unnamed schema from field types alone.
    pub fn from_types(types: Vec<FieldType>) -> TupleDesc {
        let names = vec![None; types.len()];
        TupleDesc::new(types, names)
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Result<FieldType, DbError> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or_else(|| DbError::InvalidArgument(format!("field index {} out of range", i)))
    }

    pub fn field_name(&self, i: usize) -> Result<Option<&str>, DbError> {
        self.items
            .get(i)
            .map(|item| item.name.as_deref())
            .ok_or_else(|| DbError::InvalidArgument(format!("field index {} out of range", i)))
    }

    /// Index of the field with the given name.
    pub fn index_of(&self, name: &str) -> Result<usize, DbError> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
            .ok_or_else(|| DbError::InvalidArgument(format!("no field named {}", name)))
    }

    /// Size in bytes of a tuple with this schema. Tuples are fixed-size.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    /// Concatenate two schemas, `a`'s fields first.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut items = a.items.clone();
        items.extend(b.items.iter().cloned());
        TupleDesc { items }
    }
}

// Schemas are equal when every field type matches pairwise; names do not
// participate.
impl PartialEq for TupleDesc {
    fn eq(&self, other: &TupleDesc) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

/// The physical address of a tuple: the page it lives on and its slot there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> RecordId {
        RecordId { page_id, slot }
    }
}

/// A record: fields conforming to a schema, plus the slot it occupies on disk
/// once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    td: TupleDesc,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Create a tuple with every field zeroed for its type.
    pub fn new(td: TupleDesc) -> Tuple {
        let fields = td
            .items
            .iter()
            .map(|item| match item.field_type {
                FieldType::Int => Field::Int(0),
                FieldType::Str => Field::Str(String::new()),
            })
            .collect();
        Tuple {
            td,
            fields,
            record_id: None,
        }
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    pub fn field(&self, i: usize) -> Result<&Field, DbError> {
        self.fields
            .get(i)
            .ok_or_else(|| DbError::InvalidArgument(format!("field index {} out of range", i)))
    }

    pub fn set_field(&mut self, i: usize, f: Field) -> Result<(), DbError> {
        let expected = self.td.field_type(i)?;
        if f.field_type() != expected {
            return Err(DbError::InvalidArgument(format!(
                "field {} expects {:?}, got {:?}",
                i,
                expected,
                f.field_type()
            )));
        }
        self.fields[i] = f;
        Ok(())
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Serialize all fields in order.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        for f in &self.fields {
            f.write_to(buf);
        }
    }

    /// Parse a tuple with schema `td` from `buf`.
    pub fn read_from<B: Buf>(td: &TupleDesc, buf: &mut B) -> Result<Tuple, DbError> {
        let mut tuple = Tuple::new(td.clone());
        for i in 0..td.num_fields() {
            let f = Field::read_from(td.field_type(i)?, buf)?;
            tuple.fields[i] = f;
        }
        Ok(tuple)
    }

    /// Concatenate two tuples into one over the merged schema.
    pub fn merge(t1: &Tuple, t2: &Tuple) -> Tuple {
        let td = TupleDesc::merge(t1.tuple_desc(), t2.tuple_desc());
        let mut fields = t1.fields.clone();
        fields.extend(t2.fields.iter().cloned());
        Tuple {
            td,
            fields,
            record_id: None,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for field in &self.fields {
            if !first {
                write!(f, "\t")?;
            }
            write!(f, "{}", field)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_int_desc() -> TupleDesc {
        TupleDesc::new(
            vec![FieldType::Int, FieldType::Int],
            vec![Some("a".to_string()), Some("b".to_string())],
        )
    }

    #[test]
    fn field_compare_covers_all_ops() {
        let three = Field::Int(3);
        let five = Field::Int(5);

        assert!(three.compare(Op::LessThan, &five).unwrap());
        assert!(three.compare(Op::LessThanOrEq, &three).unwrap());
        assert!(five.compare(Op::GreaterThan, &three).unwrap());
        assert!(five.compare(Op::GreaterThanOrEq, &five).unwrap());
        assert!(three.compare(Op::Equals, &three).unwrap());
        assert!(three.compare(Op::NotEquals, &five).unwrap());
        assert!(!three.compare(Op::Equals, &five).unwrap());
    }

    #[test]
    fn field_compare_rejects_mixed_types() {
        let n = Field::Int(1);
        let s = Field::Str("one".to_string());
        assert!(n.compare(Op::Equals, &s).is_err());
    }

    #[test]
    fn string_field_round_trips_with_padding() {
        let f = Field::Str("hello".to_string());
        let mut buf = Vec::new();
        f.write_to(&mut buf);
        assert_eq!(buf.len(), FieldType::Str.len());

        let parsed = Field::read_from(FieldType::Str, &mut &buf[..]).unwrap();
        assert_eq!(parsed, f);
    }

    #[test]
    fn tuple_desc_size_and_merge() {
        let td = two_int_desc();
        assert_eq!(td.size(), 8);

        let merged = TupleDesc::merge(&td, &TupleDesc::from_types(vec![FieldType::Str]));
        assert_eq!(merged.num_fields(), 3);
        assert_eq!(merged.size(), 8 + FieldType::Str.len());
    }

    #[test]
    fn tuple_desc_equality_checks_every_field() {
        let a = TupleDesc::from_types(vec![FieldType::Int, FieldType::Int]);
        let b = two_int_desc();
        assert_eq!(a, b);

        // Differs only in the final field; must not compare equal.
        let c = TupleDesc::from_types(vec![FieldType::Int, FieldType::Str]);
        assert_ne!(a, c);

        let shorter = TupleDesc::from_types(vec![FieldType::Int]);
        assert_ne!(a, shorter);
    }

    #[test]
    fn tuple_merge_concatenates_fields() {
        let td = two_int_desc();
        let mut t1 = Tuple::new(td.clone());
        t1.set_field(0, Field::Int(1)).unwrap();
        t1.set_field(1, Field::Int(2)).unwrap();
        let mut t2 = Tuple::new(td);
        t2.set_field(0, Field::Int(3)).unwrap();
        t2.set_field(1, Field::Int(4)).unwrap();

        let merged = Tuple::merge(&t1, &t2);
        assert_eq!(merged.tuple_desc().num_fields(), 4);
        assert_eq!(merged.field(2).unwrap(), &Field::Int(3));
    }

    #[test]
    fn set_field_rejects_type_mismatch() {
        let mut t = Tuple::new(two_int_desc());
        assert!(t.set_field(0, Field::Str("x".to_string())).is_err());
    }
}
