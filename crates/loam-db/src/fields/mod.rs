//! Column values and their handles.
//!
//! A [`Field`] is a reference-counted handle to one typed column value
//! belonging to a model. Copying a handle shares the underlying storage:
//! two handles to the same storage compare equal, and a value loaded
//! through one handle is visible through all of them. The typed wrappers
//! in [`scalar`] and [`foreign_key`] deref to `Field` and add the
//! kind-specific accessors.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use tracing::warn;

use crate::dialect::{Dialect, IdentKind};
use crate::expr::filter::Where;
use crate::expr::{Assign, CompareOp};
use crate::model::{Model, ModelInner};

pub mod foreign_key;
pub mod scalar;

pub use foreign_key::ForeignKey;
pub use scalar::{DoubleField, IntField, StringField, TimestampField};

use foreign_key::FkState;

/// A field kind constructible by [`Model`] factories and the
/// `define_model!` macro.
pub trait FieldKind: Sized {
    fn create(model: &Model, name: &str) -> Self;
}

pub(crate) enum Payload {
    Int(i64),
    Str(String),
    Double(f64),
    Timestamp(Option<DateTime<Utc>>),
    ForeignKey(FkState),
}

pub(crate) struct FieldInner {
    pub(crate) name: String,
    pub(crate) model: Weak<RefCell<ModelInner>>,
    pub(crate) is_null: bool,
    pub(crate) modified: bool,
    pub(crate) accepts_null: bool,
    pub(crate) auto_increment: bool,
    pub(crate) primary_key: bool,
    pub(crate) assign: Option<Assign>,
    pub(crate) payload: Payload,
}

/// A reference-counted, type-erased column value.
#[derive(Clone)]
pub struct Field(pub(crate) Rc<RefCell<FieldInner>>);

impl Field {
    pub(crate) fn new(model: &Model, name: &str, payload: Payload) -> Self {
        Field(Rc::new(RefCell::new(FieldInner {
            name: name.to_string(),
            model: Rc::downgrade(&model.inner),
            is_null: true,
            modified: false,
            accepts_null: false,
            auto_increment: false,
            primary_key: false,
            assign: None,
            payload,
        })))
    }

    /// The bare column name.
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn is_null(&self) -> bool {
        self.0.borrow().is_null
    }

    pub fn is_modified(&self) -> bool {
        self.0.borrow().modified
    }

    pub fn accepts_null(&self) -> bool {
        self.0.borrow().accepts_null
    }

    pub fn set_accepts_null(&self, accepts: bool) {
        self.0.borrow_mut().accepts_null = accepts;
    }

    pub fn auto_increment(&self) -> bool {
        self.0.borrow().auto_increment
    }

    pub fn set_auto_increment(&self, auto: bool) {
        self.0.borrow_mut().auto_increment = auto;
    }

    pub fn primary_key(&self) -> bool {
        self.0.borrow().primary_key
    }

    pub fn set_primary_key(&self, pk: bool) {
        self.0.borrow_mut().primary_key = pk;
    }

    pub(crate) fn set_null(&self, null: bool) {
        self.0.borrow_mut().is_null = null;
    }

    pub(crate) fn set_modified(&self, modified: bool) {
        self.0.borrow_mut().modified = modified;
    }

    /// Attaches a pending assignment expression; on UPDATE the column is
    /// set from the expression instead of the field's literal value.
    pub fn assign(&self, expr: Assign) {
        let mut inner = self.0.borrow_mut();
        inner.modified = true;
        inner.assign = Some(expr);
    }

    pub(crate) fn pending_assign(&self) -> Option<Assign> {
        self.0.borrow().assign.clone()
    }

    /// True when this field belongs to `model` (same allocation).
    pub(crate) fn belongs_to(&self, model: &Model) -> bool {
        self.0.borrow().model.as_ptr() == Rc::as_ptr(&model.inner)
    }

    pub(crate) fn is_foreign_key(&self) -> bool {
        matches!(self.0.borrow().payload, Payload::ForeignKey(_))
    }

    /// The referenced model instance cached behind a foreign key, if any.
    pub(crate) fn related_model(&self) -> Option<Model> {
        match &self.0.borrow().payload {
            Payload::ForeignKey(fk) => fk.instance.as_ref().map(|i| i.model.clone()),
            _ => None,
        }
    }

    /// The dialect-escaped, table-qualified column name, `"T<slot>"."name"`.
    ///
    /// Panics if the field has been detached from its model; rendering a
    /// detached field is a programming error.
    pub(crate) fn qualified_name(&self, dialect: &dyn Dialect) -> String {
        let inner = self.0.borrow();
        let model = inner
            .model
            .upgrade()
            .expect("field is not attached to a model");
        let slot = model.borrow().table_slot;
        format!(
            "{}.{}",
            dialect.escape_identifier(&format!("T{slot}"), IdentKind::Table),
            dialect.escape_identifier(&inner.name, IdentKind::Column)
        )
    }

    /// Serializes the current value to its storage form.
    pub fn to_storage(&self) -> Value {
        let inner = self.0.borrow();
        if inner.is_null {
            return Value::Null;
        }
        match &inner.payload {
            Payload::Int(v) => Value::Integer(*v),
            Payload::Str(v) => Value::Text(v.clone()),
            Payload::Double(v) => Value::Real(*v),
            Payload::Timestamp(v) => match v {
                Some(ts) => Value::Text(ts.to_rfc3339()),
                None => Value::Null,
            },
            Payload::ForeignKey(fk) => fk.id.clone(),
        }
    }

    /// Loads a storage value into the field.
    ///
    /// This is a load, not a user edit: the modified flag is cleared and
    /// the null flag follows the incoming value's nullness.
    pub fn load_storage(&self, value: Value) {
        let mut guard = self.0.borrow_mut();
        let inner = &mut *guard;
        inner.modified = false;
        inner.is_null = matches!(value, Value::Null);
        match &mut inner.payload {
            Payload::Int(slot) => match value {
                Value::Integer(v) => *slot = v,
                Value::Null => {}
                other => {
                    warn!(value = ?other, "integer field loaded with non-integer value");
                    inner.is_null = true;
                }
            },
            Payload::Str(slot) => match value {
                Value::Text(v) => *slot = v,
                Value::Null => {}
                other => {
                    warn!(value = ?other, "string field loaded with non-text value");
                    inner.is_null = true;
                }
            },
            Payload::Double(slot) => match value {
                Value::Real(v) => *slot = v,
                Value::Integer(v) => *slot = v as f64,
                Value::Null => {}
                other => {
                    warn!(value = ?other, "double field loaded with non-numeric value");
                    inner.is_null = true;
                }
            },
            Payload::Timestamp(slot) => match value {
                Value::Text(text) => match DateTime::parse_from_rfc3339(&text) {
                    Ok(ts) => *slot = Some(ts.with_timezone(&Utc)),
                    Err(err) => {
                        warn!(%text, %err, "timestamp field loaded with unparsable text");
                        inner.is_null = true;
                    }
                },
                Value::Null => {}
                other => {
                    warn!(value = ?other, "timestamp field loaded with non-text value");
                    inner.is_null = true;
                }
            },
            Payload::ForeignKey(fk) => {
                // The cached instance survives; a mismatch against the new
                // identifier is detected on the next access.
                fk.id = value;
            }
        }
    }

    /// The column's storage type, used when generating DDL.
    pub fn storage_type_description(&self) -> String {
        let inner = self.0.borrow();
        let mut rs = match &inner.payload {
            Payload::Int(_) | Payload::ForeignKey(_) => "INTEGER".to_string(),
            Payload::Str(_) => "TEXT".to_string(),
            Payload::Double(_) => "REAL".to_string(),
            Payload::Timestamp(_) => "TEXT".to_string(),
        };
        if inner.primary_key {
            rs.push_str(" PRIMARY KEY");
            if inner.auto_increment {
                rs.push_str(" AUTOINCREMENT");
            }
        } else if !inner.accepts_null {
            rs.push_str(" NOT NULL");
        }
        rs
    }

    // Typed accessors used by the scalar wrappers.

    pub(crate) fn set_int(&self, value: i64) {
        let mut inner = self.0.borrow_mut();
        inner.is_null = false;
        inner.modified = true;
        inner.payload = Payload::Int(value);
    }

    pub(crate) fn int_value(&self) -> Option<i64> {
        let inner = self.0.borrow();
        match (&inner.payload, inner.is_null) {
            (Payload::Int(v), false) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn set_string(&self, value: String) {
        let mut inner = self.0.borrow_mut();
        inner.is_null = false;
        inner.modified = true;
        inner.payload = Payload::Str(value);
    }

    pub(crate) fn string_value(&self) -> Option<String> {
        let inner = self.0.borrow();
        match (&inner.payload, inner.is_null) {
            (Payload::Str(v), false) => Some(v.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_double(&self, value: f64) {
        let mut inner = self.0.borrow_mut();
        inner.is_null = false;
        inner.modified = true;
        inner.payload = Payload::Double(value);
    }

    pub(crate) fn double_value(&self) -> Option<f64> {
        let inner = self.0.borrow();
        match (&inner.payload, inner.is_null) {
            (Payload::Double(v), false) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn set_timestamp(&self, value: DateTime<Utc>) {
        let mut inner = self.0.borrow_mut();
        inner.is_null = false;
        inner.modified = true;
        inner.payload = Payload::Timestamp(Some(value));
    }

    pub(crate) fn timestamp_value(&self) -> Option<DateTime<Utc>> {
        let inner = self.0.borrow();
        match (&inner.payload, inner.is_null) {
            (Payload::Timestamp(v), false) => *v,
            _ => None,
        }
    }

    // Predicate builders.

    /// `field = ?`
    pub fn eq<V: Into<Value>>(&self, value: V) -> Where {
        Where::compare(self, CompareOp::Eq, value.into())
    }

    /// `field != ?`
    pub fn ne<V: Into<Value>>(&self, value: V) -> Where {
        Where::compare(self, CompareOp::Ne, value.into())
    }

    /// `field < ?`
    pub fn lt<V: Into<Value>>(&self, value: V) -> Where {
        Where::compare(self, CompareOp::Lt, value.into())
    }

    /// `field > ?`
    pub fn gt<V: Into<Value>>(&self, value: V) -> Where {
        Where::compare(self, CompareOp::Gt, value.into())
    }

    /// `field <= ?`
    pub fn lte<V: Into<Value>>(&self, value: V) -> Where {
        Where::compare(self, CompareOp::Lte, value.into())
    }

    /// `field >= ?`
    pub fn gte<V: Into<Value>>(&self, value: V) -> Where {
        Where::compare(self, CompareOp::Gte, value.into())
    }

    /// `left = right` between two columns.
    pub fn eq_field(&self, other: &Field) -> Where {
        Where::compare_field(self, CompareOp::Eq, other)
    }

    /// `left != right` between two columns.
    pub fn ne_field(&self, other: &Field) -> Where {
        Where::compare_field(self, CompareOp::Ne, other)
    }

    /// `left < right` between two columns.
    pub fn lt_field(&self, other: &Field) -> Where {
        Where::compare_field(self, CompareOp::Lt, other)
    }

    /// `left > right` between two columns.
    pub fn gt_field(&self, other: &Field) -> Where {
        Where::compare_field(self, CompareOp::Gt, other)
    }

    /// `left <= right` between two columns.
    pub fn lte_field(&self, other: &Field) -> Where {
        Where::compare_field(self, CompareOp::Lte, other)
    }

    /// `left >= right` between two columns.
    pub fn gte_field(&self, other: &Field) -> Where {
        Where::compare_field(self, CompareOp::Gte, other)
    }

    /// `field IN (?, ?, …)`
    pub fn in_<V, I>(&self, values: I) -> Where
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Where::in_list(self, values.into_iter().map(Into::into).collect())
    }

    /// `field LIKE ?`; the pattern is bound verbatim.
    pub fn like(&self, pattern: impl Into<String>) -> Where {
        Where::like(self, pattern.into())
    }

    /// `((field + offset) % divisor = 0)`
    pub fn divisible_by(&self, divisor: i64, offset: i64) -> Where {
        Where::divisible_by(self, divisor, offset)
    }

    /// `((field & flag) != 0)`
    pub fn has_flag(&self, flag: i64) -> Where {
        Where::flag_set(self, flag)
    }

    /// `field IS NULL`
    pub fn null(&self) -> Where {
        Where::is_null(self)
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Field {}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Field")
            .field("name", &inner.name)
            .field("null", &inner.is_null)
            .field("modified", &inner.modified)
            .finish()
    }
}
