use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::StringId;

/// A tagged VM value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Str(StringId),
    Table(TableRef),
    Closure(Closure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Script function starting at a code address.
    Script { addr: u32 },
    /// Host-side function registered with [`crate::Vm::register_native`].
    Native { id: u32 },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) => "closure",
        }
    }

    /// `nil` and integer zero are false, everything else is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Int(0))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Script-level equality: numbers compare by value across int/float,
    /// tables by identity.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            _ => self == other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Closure> for Value {
    fn from(value: Closure) -> Self {
        Value::Closure(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKey {
    Int(i64),
    Str(StringId),
}

impl TableKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(TableKey::Int(*i)),
            Value::Str(s) => Some(TableKey::Str(*s)),
            _ => None,
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            TableKey::Int(i) => Value::Int(i),
            TableKey::Str(s) => Value::Str(s),
        }
    }
}

/// Ordered key/value storage behind a [`TableRef`].
#[derive(Debug, Default)]
pub struct Table {
    entries: BTreeMap<TableKey, Value>,
}

impl Table {
    pub fn get(&self, key: TableKey) -> Value {
        self.entries.get(&key).cloned().unwrap_or(Value::Nil)
    }

    /// Storing `nil` removes the key.
    pub fn put(&mut self, key: TableKey, value: Value) {
        if value.is_nil() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableKey, &Value)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

/// Shared, mutable handle to a table. Clones alias the same table.
#[derive(Debug, Clone, Default)]
pub struct TableRef(Rc<RefCell<Table>>);

impl TableRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared table, stable while any clone is alive.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn get(&self, key: TableKey) -> Value {
        self.0.borrow().get(key)
    }

    pub fn put(&self, key: TableKey, value: Value) {
        self.0.borrow_mut().put(key, value);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Copy of the entries in key order.
    pub fn entries(&self) -> Vec<(TableKey, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k, v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::Table(TableRef::new()).is_truthy());
    }

    #[test]
    fn tables_compare_by_identity() {
        let a = TableRef::new();
        let b = TableRef::new();
        assert_eq!(Value::Table(a.clone()), Value::Table(a));
        assert_ne!(Value::Table(b), Value::Table(TableRef::new()));
    }

    #[test]
    fn loose_equality_crosses_number_kinds() {
        assert!(Value::Int(2).loosely_equals(&Value::Float(2.0)));
        assert!(!Value::Int(2).loosely_equals(&Value::Float(2.5)));
        assert_ne!(Value::Int(2), Value::Float(2.0));
    }

    #[test]
    fn putting_nil_removes_entry() {
        let table = TableRef::new();
        table.put(TableKey::Int(1), Value::Int(10));
        table.put(TableKey::Int(2), Value::Int(20));
        assert_eq!(table.len(), 2);
        table.put(TableKey::Int(1), Value::Nil);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(TableKey::Int(1)), Value::Nil);
    }

    #[test]
    fn entries_are_key_ordered() {
        let table = TableRef::new();
        for k in [3, 1, 2] {
            table.put(TableKey::Int(k), Value::Int(k * 10));
        }
        let keys: Vec<_> = table.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![TableKey::Int(1), TableKey::Int(2), TableKey::Int(3)]
        );
    }
}
