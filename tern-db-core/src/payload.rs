//! Payload schema and rows
//!
//! A namespace's schema is a [`PayloadType`]: an ordered list of fixed fields
//! (indexed scalars or arrays) plus the implicit *tuple* field at position 0
//! holding the serialized document for non-indexed paths. Field ids are small
//! integers, stable for the lifetime of the namespace; the schema is
//! append-only and never reordered.
//!
//! A [`PayloadRow`] stores scalars inline and array fields as `(offset, len)`
//! slots into a shared per-row arena. All access goes through the
//! [`PayloadType`] so slot layout never leaks.

use crate::error::{Error, Result};
use crate::value::{Value, ValueType};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use xxhash_rust::xxh64::Xxh64;

/// Stable small-integer field identifier
pub type FieldId = usize;

/// The implicit tuple field holding the serialized document
pub const TUPLE_FIELD: FieldId = 0;

/// Definition of a single payload field
#[derive(Debug, Clone)]
pub struct PayloadField {
    pub name: String,
    pub value_type: ValueType,
    pub is_array: bool,
    /// Sparse fields live only in the tuple and are decoded on demand
    pub is_sparse: bool,
    pub is_pk: bool,
}

impl PayloadField {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            is_array: false,
            is_sparse: false,
            is_pk: false,
        }
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.is_sparse = true;
        self
    }

    pub fn pk(mut self) -> Self {
        self.is_pk = true;
        self
    }
}

/// Namespace schema: ordered fixed fields plus the implicit tuple field
#[derive(Debug, Clone, Default)]
pub struct PayloadType {
    fields: Vec<PayloadField>,
    by_name: FxHashMap<String, FieldId>,
}

impl PayloadType {
    /// New schema containing only the implicit tuple field
    pub fn new() -> Self {
        let mut pt = Self {
            fields: Vec::new(),
            by_name: FxHashMap::default(),
        };
        pt.fields.push(PayloadField::new("-tuple", ValueType::String));
        pt.by_name.insert("-tuple".to_string(), TUPLE_FIELD);
        pt
    }

    /// Append a field. The schema is append-only; re-adding a name fails.
    pub fn add_field(&mut self, field: PayloadField) -> Result<FieldId> {
        if self.by_name.contains_key(&field.name) {
            return Err(Error::conflict(format!(
                "field '{}' already exists",
                field.name
            )));
        }
        let id = self.fields.len();
        self.by_name.insert(field.name.clone(), id);
        self.fields.push(field);
        Ok(id)
    }

    pub fn field(&self, id: FieldId) -> Result<&PayloadField> {
        self.fields
            .get(id)
            .ok_or_else(|| Error::internal(format!("field id {} out of range", id)))
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    /// Id of the PK field, if one is declared
    pub fn pk_field(&self) -> Option<FieldId> {
        self.fields.iter().position(|f| f.is_pk)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[PayloadField] {
        &self.fields
    }

    /// Allocate an empty row shaped for this schema
    pub fn new_row(&self) -> PayloadRow {
        PayloadRow {
            slots: vec![Slot::Empty; self.fields.len()],
            arena: Vec::new(),
            tuple: Vec::new(),
        }
    }

    /// Read every value of a field (one element for scalars)
    pub fn get<'a>(&self, row: &'a PayloadRow, field: FieldId) -> Result<SmallVec<[&'a Value; 1]>> {
        self.field(field)?;
        Ok(match &row.slots[field] {
            Slot::Empty => SmallVec::new(),
            Slot::Scalar(v) => {
                let mut out = SmallVec::new();
                out.push(v);
                out
            }
            Slot::Array { offset, len } => row.arena
                [*offset as usize..(*offset + *len) as usize]
                .iter()
                .collect(),
        })
    }

    /// Read the first value of a field, `Null` when unset
    pub fn get_one<'a>(&self, row: &'a PayloadRow, field: FieldId) -> Result<&'a Value> {
        static NULL: Value = Value::Null;
        Ok(self.get(row, field)?.first().copied().unwrap_or(&NULL))
    }

    /// Write a field. Scalars must come in as a single value; array fields
    /// append their values into the row arena.
    pub fn set(&self, row: &mut PayloadRow, field: FieldId, values: Vec<Value>) -> Result<()> {
        let def = self.field(field)?;
        if def.is_array {
            let offset = row.arena.len() as u32;
            let len = values.len() as u32;
            row.arena.extend(values);
            row.slots[field] = Slot::Array { offset, len };
        } else {
            let mut values = values;
            if values.len() > 1 {
                return Err(Error::invalid_argument(format!(
                    "field '{}' is not an array",
                    def.name
                )));
            }
            row.slots[field] = match values.pop() {
                Some(v) => Slot::Scalar(v.coerce(def.value_type)?),
                None => Slot::Empty,
            };
        }
        Ok(())
    }

    /// Build a composite key value over the given field set
    pub fn composite_key(&self, row: &PayloadRow, fields: &[FieldId]) -> Result<Value> {
        let mut parts = Vec::with_capacity(fields.len());
        for &f in fields {
            parts.push(self.get_one(row, f)?.clone());
        }
        Ok(Value::Composite(parts))
    }

    /// Deterministic hash over a row's committed content; feeds the
    /// namespace data hash.
    pub fn row_hash(&self, row: &PayloadRow) -> u64 {
        let mut h = Xxh64::new(0);
        for (id, _def) in self.fields.iter().enumerate() {
            match &row.slots[id] {
                Slot::Empty => h.update(&[0xff]),
                Slot::Scalar(v) => hash_value(&mut h, v),
                Slot::Array { offset, len } => {
                    h.update(&len.to_le_bytes());
                    for v in &row.arena[*offset as usize..(*offset + *len) as usize] {
                        hash_value(&mut h, v);
                    }
                }
            }
        }
        h.update(&row.tuple);
        h.digest()
    }
}

fn hash_value(h: &mut Xxh64, v: &Value) {
    match v {
        Value::Null => h.update(&[0]),
        Value::Bool(b) => h.update(&[1, *b as u8]),
        Value::Int(i) => {
            h.update(&[2]);
            h.update(&i.to_le_bytes());
        }
        Value::Int64(i) => {
            h.update(&[3]);
            h.update(&i.to_le_bytes());
        }
        Value::Double(d) => {
            h.update(&[4]);
            h.update(&d.to_bits().to_le_bytes());
        }
        Value::String(s) => {
            h.update(&[5]);
            h.update(s.as_bytes());
        }
        Value::Tuple(vs) | Value::Composite(vs) => {
            h.update(&[6, vs.len() as u8]);
            for v in vs {
                hash_value(h, v);
            }
        }
    }
}

/// One fixed-block slot of a row
#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Scalar(Value),
    /// `(offset, len)` into the row arena
    Array { offset: u32, len: u32 },
}

/// Concrete row: fixed slots, shared arena for array fields, and the
/// serialized tuple for non-indexed paths
#[derive(Debug, Clone, Default)]
pub struct PayloadRow {
    slots: Vec<Slot>,
    arena: Vec<Value>,
    tuple: Vec<u8>,
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Empty
    }
}

impl PayloadRow {
    /// Serialized document bytes for non-indexed paths
    pub fn tuple(&self) -> &[u8] {
        &self.tuple
    }

    pub fn set_tuple(&mut self, bytes: Vec<u8>) {
        self.tuple = bytes;
    }
}

/// Shared read-only handle to a schema
pub type PayloadTypeHandle = Arc<PayloadType>;

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> PayloadType {
        let mut pt = PayloadType::new();
        pt.add_field(PayloadField::new("id", ValueType::Int).pk())
            .unwrap();
        pt.add_field(PayloadField::new("tags", ValueType::String).array())
            .unwrap();
        pt
    }

    #[test]
    fn scalar_and_array_slots() {
        let pt = schema();
        let id = pt.field_id("id").unwrap();
        let tags = pt.field_id("tags").unwrap();
        let mut row = pt.new_row();
        pt.set(&mut row, id, vec![Value::Int(7)]).unwrap();
        pt.set(&mut row, tags, vec!["a".into(), "b".into()]).unwrap();

        assert_eq!(pt.get_one(&row, id).unwrap(), &Value::Int(7));
        let got = pt.get(&row, tags).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], &Value::String("a".into()));
    }

    #[test]
    fn schema_is_append_only() {
        let mut pt = schema();
        assert!(pt
            .add_field(PayloadField::new("id", ValueType::Int))
            .is_err());
        let before = pt.field_id("tags").unwrap();
        pt.add_field(PayloadField::new("extra", ValueType::Double))
            .unwrap();
        assert_eq!(pt.field_id("tags").unwrap(), before);
    }

    #[test]
    fn set_coerces_scalars() {
        let pt = schema();
        let id = pt.field_id("id").unwrap();
        let mut row = pt.new_row();
        pt.set(&mut row, id, vec![Value::Int64(9)]).unwrap();
        assert_eq!(pt.get_one(&row, id).unwrap(), &Value::Int(9));
    }

    #[test]
    fn row_hash_tracks_content() {
        let pt = schema();
        let id = pt.field_id("id").unwrap();
        let mut a = pt.new_row();
        let mut b = pt.new_row();
        pt.set(&mut a, id, vec![Value::Int(1)]).unwrap();
        pt.set(&mut b, id, vec![Value::Int(1)]).unwrap();
        assert_eq!(pt.row_hash(&a), pt.row_hash(&b));
        pt.set(&mut b, id, vec![Value::Int(2)]).unwrap();
        assert_ne!(pt.row_hash(&a), pt.row_hash(&b));
    }
}
