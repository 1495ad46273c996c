//! Foreign keys: integer columns that reference another model's row.
//!
//! A `ForeignKey<T>` keeps two things: the raw identifier column value,
//! and a lazily instantiated cached instance of the referenced model.
//! The cache is filled on first access and refetched whenever its primary
//! key no longer matches the stored identifier.

use std::any::Any;
use std::marker::PhantomData;
use std::ops::Deref;

use rusqlite::types::Value;

use crate::connection::Database;
use crate::error::Result;
use crate::fields::{Field, FieldKind, Payload};
use crate::model::{Model, Record};
use crate::query::QuerySet;

pub(crate) struct FkInstance {
    pub(crate) model: Model,
    pub(crate) erased: Box<dyn Any>,
}

pub(crate) struct FkState {
    pub(crate) id: Value,
    pub(crate) instance: Option<FkInstance>,
}

/// A reference to a row of model type `T`.
pub struct ForeignKey<T: Record> {
    field: Field,
    _marker: PhantomData<T>,
}

impl<T: Record> ForeignKey<T> {
    /// The raw identifier value of the referenced row.
    pub fn id(&self) -> Value {
        match &self.field.0.borrow().payload {
            Payload::ForeignKey(fk) => fk.id.clone(),
            _ => unreachable!("foreign key wrapper over non-foreign-key field"),
        }
    }

    /// Overwrites the raw identifier, discarding any cached instance.
    pub fn set_id<V: Into<Value>>(&self, id: V) {
        let id = id.into();
        let mut inner = self.field.0.borrow_mut();
        inner.is_null = matches!(id, Value::Null);
        inner.modified = true;
        if let Payload::ForeignKey(fk) = &mut inner.payload {
            fk.id = id;
            fk.instance = None;
        }
    }

    /// Installs `other` as the referenced instance. The cache shares
    /// storage with the caller's instance; when `other` already has a
    /// non-null primary key, the identifier is adopted from it.
    pub fn set(&self, other: &T) {
        let pk = other.model().pk();
        let pk_value = pk.to_storage();
        let mut inner = self.field.0.borrow_mut();
        inner.is_null = false;
        inner.modified = true;
        if let Payload::ForeignKey(fk) = &mut inner.payload {
            fk.instance = Some(FkInstance {
                model: other.model().clone(),
                erased: Box::new(other.clone()),
            });
            if !matches!(pk_value, Value::Null) {
                fk.id = pk_value;
            }
        }
    }

    /// The cached referenced instance, creating an unbound one if none
    /// exists yet. Does not touch the database.
    pub fn related(&self) -> T {
        if let Some(existing) = self.cached() {
            return existing;
        }
        let fresh = T::new();
        let mut inner = self.field.0.borrow_mut();
        if let Payload::ForeignKey(fk) = &mut inner.payload {
            fk.instance = Some(FkInstance {
                model: fresh.model().clone(),
                erased: Box::new(fresh.clone()),
            });
        }
        fresh
    }

    /// The referenced instance, fetched from the database when the cache
    /// is missing or stale.
    ///
    /// Staleness covers both "identifier changed after load" and "never
    /// loaded but an identifier is set": whenever the cached instance's
    /// primary key disagrees with the stored identifier, a fetch by
    /// primary key repopulates it and clears its modified flags.
    pub fn get(&self, db: &Database) -> Result<T> {
        let instance = self.related();
        let id = self.id();
        let pk = instance.model().pk();
        let stale =
            (pk.is_null() && !matches!(id, Value::Null)) || pk.to_storage() != id;
        if stale && !matches!(id, Value::Null) {
            let mut query =
                QuerySet::new(db.clone(), instance.model()).filter(pk.eq(id));
            query.next()?;
            instance.model().reset_modified();
        }
        Ok(instance)
    }

    fn cached(&self) -> Option<T> {
        match &self.field.0.borrow().payload {
            Payload::ForeignKey(fk) => fk
                .instance
                .as_ref()
                .and_then(|i| i.erased.downcast_ref::<T>())
                .cloned(),
            _ => None,
        }
    }
}

impl<T: Record> FieldKind for ForeignKey<T> {
    fn create(model: &Model, name: &str) -> Self {
        let field = Field::new(
            model,
            name,
            Payload::ForeignKey(FkState {
                id: Value::Null,
                instance: None,
            }),
        );
        model.add_field(field.clone());
        ForeignKey {
            field,
            _marker: PhantomData,
        }
    }
}

impl<T: Record> Clone for ForeignKey<T> {
    fn clone(&self) -> Self {
        ForeignKey {
            field: self.field.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> Deref for ForeignKey<T> {
    type Target = Field;

    fn deref(&self) -> &Field {
        &self.field
    }
}

impl<T: Record> std::fmt::Debug for ForeignKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignKey")
            .field("name", &self.field.name())
            .field("id", &self.id())
            .finish()
    }
}
