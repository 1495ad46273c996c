//! Models: ordered collections of fields describing one table row.

use std::cell::RefCell;
use std::rc::Rc;

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use crate::connection::Database;
use crate::dialect::{Dialect, IdentKind, SqliteDialect};
use crate::error::{DbError, Result};
use crate::fields::{
    DoubleField, Field, FieldKind, ForeignKey, IntField, Payload, StringField, TimestampField,
};

/// A user-defined model type: a cheap-clone struct owning a [`Model`] and
/// typed field handles. Cloning shares all field storage.
///
/// Usually implemented through the [`define_model!`](crate::define_model)
/// macro.
pub trait Record: Clone + 'static {
    /// Creates a fresh, unbound instance with all fields null.
    fn new() -> Self;

    /// The underlying model.
    fn model(&self) -> &Model;
}

pub(crate) struct ModelInner {
    pub(crate) table_name: String,
    /// Table alias slot, assigned transiently while building one query.
    pub(crate) table_slot: usize,
    pub(crate) fields: Vec<Field>,
    pub(crate) primary_key: Option<Field>,
}

/// One table/row shape: a table name plus an ordered set of fields.
///
/// `Model` is a shared handle; clones refer to the same row.
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Rc<RefCell<ModelInner>>,
}

impl Model {
    pub fn new(table_name: impl Into<String>) -> Self {
        Model {
            inner: Rc::new(RefCell::new(ModelInner {
                table_name: table_name.into(),
                table_slot: 0,
                fields: Vec::new(),
                primary_key: None,
            })),
        }
    }

    /// Finishes construction: designates the primary key, synthesizing an
    /// auto-increment integer `id` as the first field when no field was
    /// declared primary. Idempotent.
    pub fn init(&self) {
        let declared = {
            let inner = self.inner.borrow();
            if inner.primary_key.is_some() {
                return;
            }
            inner.fields.iter().find(|f| f.primary_key()).cloned()
        };
        if let Some(field) = declared {
            self.inner.borrow_mut().primary_key = Some(field);
            return;
        }

        let id = Field::new(self, "id", Payload::Int(0));
        id.set_auto_increment(true);
        id.set_primary_key(true);
        let mut inner = self.inner.borrow_mut();
        inner.fields.insert(0, id.clone());
        inner.primary_key = Some(id);
    }

    /// The primary-key field. Panics if [`init`](Model::init) was never
    /// called; using an uninitialised model is a programming error.
    pub fn pk(&self) -> Field {
        self.inner
            .borrow()
            .primary_key
            .clone()
            .expect("model is not initialised")
    }

    pub fn table_name(&self) -> String {
        self.inner.borrow().table_name.clone()
    }

    /// All fields, in declaration order (column order).
    pub fn fields(&self) -> Vec<Field> {
        self.inner.borrow().fields.clone()
    }

    /// Looks a field up by column name.
    pub fn field_named(&self, name: &str) -> Option<Field> {
        self.inner
            .borrow()
            .fields
            .iter()
            .find(|f| f.0.borrow().name == name)
            .cloned()
    }

    /// Clears the modified flag on every field.
    pub fn reset_modified(&self) {
        for field in self.fields() {
            field.set_modified(false);
        }
    }

    pub(crate) fn add_field(&self, field: Field) {
        self.inner.borrow_mut().fields.push(field);
    }

    pub(crate) fn foreign_keys(&self) -> Vec<Field> {
        self.inner
            .borrow()
            .fields
            .iter()
            .filter(|f| f.is_foreign_key())
            .cloned()
            .collect()
    }

    pub(crate) fn set_table_slot(&self, slot: usize) {
        self.inner.borrow_mut().table_slot = slot;
    }

    pub(crate) fn identity(&self) -> *const RefCell<ModelInner> {
        Rc::as_ptr(&self.inner)
    }

    // Field factories, used during model construction.

    pub fn int_field(&self, name: &str) -> IntField {
        IntField::create(self, name)
    }

    pub fn string_field(&self, name: &str) -> StringField {
        StringField::create(self, name)
    }

    pub fn double_field(&self, name: &str) -> DoubleField {
        DoubleField::create(self, name)
    }

    pub fn timestamp_field(&self, name: &str) -> TimestampField {
        TimestampField::create(self, name)
    }

    pub fn foreign_key<T: Record>(&self, name: &str) -> ForeignKey<T> {
        ForeignKey::create(self, name)
    }

    /// Saves the row: INSERT when the primary key is null, UPDATE of the
    /// modified fields otherwise. After an insert the primary key is
    /// adopted from the connection's last-insert id.
    pub fn save(&self, db: &Database) -> Result<()> {
        if self.pk().is_null() {
            self.insert(db)
        } else {
            self.update_row(db)
        }
    }

    /// Inserts the row unconditionally, skipping a null primary key so
    /// auto-increment can assign one.
    pub fn insert(&self, db: &Database) -> Result<()> {
        let dialect = SqliteDialect;
        let fields = self.fields();
        let included: Vec<&Field> = fields
            .iter()
            .filter(|f| !(f.primary_key() && f.is_null()))
            .collect();

        let table = dialect.escape_identifier(&self.table_name(), IdentKind::Table);
        let sql = if included.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns = included
                .iter()
                .map(|f| dialect.escape_identifier(&f.name(), IdentKind::Column))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; included.len()].join(", ");
            format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})")
        };
        debug!(%sql, "inserting row");

        let values: Vec<Value> = included.iter().map(|f| f.to_storage()).collect();
        let conn = db.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(|source| DbError::Prepare {
            sql: sql.clone(),
            source,
        })?;
        stmt.execute(params_from_iter(values.iter()))
            .map_err(|source| DbError::Execute {
                sql: sql.clone(),
                source,
            })?;
        drop(stmt);
        let row_id = conn.last_insert_rowid();
        drop(conn);

        self.pk().load_storage(Value::Integer(row_id));
        Ok(())
    }

    fn update_row(&self, db: &Database) -> Result<()> {
        let dialect = SqliteDialect;
        let fields = self.fields();
        let modified: Vec<&Field> = fields.iter().filter(|f| f.is_modified()).collect();
        if modified.is_empty() {
            return Ok(());
        }

        let sets = modified
            .iter()
            .map(|f| {
                format!(
                    "{} = ?",
                    dialect.escape_identifier(&f.name(), IdentKind::Column)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            dialect.escape_identifier(&self.table_name(), IdentKind::Table),
            sets,
            dialect.escape_identifier(&self.pk().name(), IdentKind::Column)
        );
        debug!(%sql, "updating row");

        let mut values: Vec<Value> = modified.iter().map(|f| f.to_storage()).collect();
        values.push(self.pk().to_storage());

        let conn = db.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(|source| DbError::Prepare {
            sql: sql.clone(),
            source,
        })?;
        stmt.execute(params_from_iter(values.iter()))
            .map_err(|source| DbError::Execute {
                sql: sql.clone(),
                source,
            })?;
        Ok(())
    }

    /// Deletes the row identified by the primary key and nulls the key.
    pub fn remove(&self, db: &Database) -> Result<()> {
        let dialect = SqliteDialect;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            dialect.escape_identifier(&self.table_name(), IdentKind::Table),
            dialect.escape_identifier(&self.pk().name(), IdentKind::Column)
        );
        debug!(%sql, "deleting row");

        let pk_value = self.pk().to_storage();
        let conn = db.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(|source| DbError::Prepare {
            sql: sql.clone(),
            source,
        })?;
        stmt.execute(params_from_iter([&pk_value]))
            .map_err(|source| DbError::Execute {
                sql: sql.clone(),
                source,
            })?;
        drop(stmt);
        drop(conn);

        self.pk().set_null(true);
        Ok(())
    }

    /// CREATE TABLE statement for this model's fields.
    pub fn create_table_sql(&self, dialect: &dyn Dialect) -> String {
        let fields = self.fields();
        let columns = fields
            .iter()
            .map(|f| {
                format!(
                    "    {} {}",
                    dialect.escape_identifier(&f.name(), IdentKind::Column),
                    f.storage_type_description()
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE {} (\n{}\n)",
            dialect.escape_identifier(&self.table_name(), IdentKind::Table),
            columns
        )
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Model")
            .field("table", &inner.table_name)
            .field(
                "fields",
                &inner
                    .fields
                    .iter()
                    .map(|field| field.0.borrow().name.clone())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_an_auto_increment_pk_when_none_declared() {
        let model = Model::new("note");
        model.string_field("body");
        model.init();

        let fields = model.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name(), "id");
        assert!(fields[0].primary_key());
        assert!(fields[0].auto_increment());
        assert_eq!(model.pk(), fields[0]);
    }

    #[test]
    fn keeps_a_declared_pk() {
        let model = Model::new("country");
        let code = model.string_field("code");
        code.set_primary_key(true);
        model.string_field("name");
        model.init();

        let fields = model.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(model.pk().name(), "code");
    }

    #[test]
    fn init_is_idempotent() {
        let model = Model::new("note");
        model.string_field("body");
        model.init();
        model.init();
        assert_eq!(model.fields().len(), 2);
    }

    #[test]
    fn create_table_sql_lists_every_column() {
        let model = Model::new("note");
        let body = model.string_field("body");
        let score = model.double_field("score");
        score.set_accepts_null(true);
        model.init();
        let _ = body;

        let sql = model.create_table_sql(&SqliteDialect);
        assert_eq!(
            sql,
            "CREATE TABLE \"note\" (\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n    \"body\" TEXT NOT NULL,\n    \"score\" REAL\n)"
        );
    }
}
