//! The query-construction engine.
//!
//! A [`QuerySet`] takes one root model plus accumulated filters,
//! projection, ordering and limits, explores the foreign-key graph to
//! decide the joins, renders one statement, executes it once and loads
//! result rows back into the model's fields.
//!
//! `build` and `exec` are each one-shot: building twice does not re-run
//! exploration, executing twice does not re-bind or re-dispatch. The
//! bind-value list is collected in the exact order the filters emitted
//! their fragments, because the driver binds positionally.

use std::collections::VecDeque;

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use crate::connection::Database;
use crate::dialect::{Dialect, IdentKind, SqliteDialect};
use crate::error::{DbError, Result};
use crate::expr::Where;
use crate::fields::Field;
use crate::model::Model;

mod explore;

use explore::explore_joins;

/// Builds and runs one SELECT, UPDATE or DELETE over a model graph.
pub struct QuerySet {
    db: Database,
    model: Model,
    dialect: SqliteDialect,
    filters: Vec<Where>,
    projection: Vec<Field>,
    excluded: Vec<Field>,
    order_by: Vec<(Field, bool)>,
    limit: Option<u32>,
    offset: Option<u32>,
    built: bool,
    executed: bool,
    poisoned: bool,
    build_failure: Option<DbError>,
    sql: String,
    selected: Vec<Field>,
    rows: VecDeque<Vec<Value>>,
    affected: usize,
}

impl QuerySet {
    pub fn new(db: Database, model: &Model) -> Self {
        QuerySet {
            db,
            model: model.clone(),
            dialect: SqliteDialect,
            filters: Vec::new(),
            projection: Vec::new(),
            excluded: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            built: false,
            executed: false,
            poisoned: false,
            build_failure: None,
            sql: String::new(),
            selected: Vec::new(),
            rows: VecDeque::new(),
            affected: 0,
        }
    }

    /// Adds a WHERE condition; conditions are joined with `AND`.
    pub fn filter(mut self, cond: Where) -> Self {
        self.filters.push(cond);
        self
    }

    /// Restricts the SELECT list to explicitly chosen fields. Joins whose
    /// subtree contains none of them are pruned. Without any `select`
    /// call, every reachable table is joined and all its fields selected.
    pub fn select(mut self, field: &Field) -> Self {
        self.projection.push(field.clone());
        self
    }

    /// Excludes a foreign key from graph exploration.
    pub fn exclude(mut self, field: &Field) -> Self {
        self.excluded.push(field.clone());
        self
    }

    /// Adds an ORDER BY clause, ascending when `asc` is true.
    pub fn order_by(mut self, field: &Field, asc: bool) -> Self {
        self.order_by.push((field.clone(), asc));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The rendered statement text, building it if necessary.
    pub fn sql(&mut self, for_delete: bool) -> &str {
        self.build(for_delete);
        &self.sql
    }

    /// Advances to the next result row, building and executing the query
    /// on first call. Each column value is loaded into the field that was
    /// selected at the same ordinal position during build.
    pub fn next(&mut self) -> Result<bool> {
        self.build(false);
        self.exec()?;
        match self.rows.pop_front() {
            None => Ok(false),
            Some(row) => {
                for (field, value) in self.selected.iter().zip(row) {
                    field.load_storage(value);
                }
                Ok(true)
            }
        }
    }

    /// Updates the root table from its modified fields.
    ///
    /// A field carrying a pending assignment expression is set from the
    /// expression; other modified fields bind their current value. With
    /// nothing modified this is a no-op reporting success and zero
    /// affected rows, without issuing a statement. WHERE bind values
    /// follow the SET bind values.
    pub fn update(&mut self) -> Result<usize> {
        let d: &dyn Dialect = &self.dialect;
        self.model.set_table_slot(0);

        let mut sets = String::new();
        let mut values: Vec<Value> = Vec::new();
        for field in self.model.fields() {
            if !field.is_modified() {
                continue;
            }
            if !sets.is_empty() {
                sets.push_str(", ");
            }
            sets.push_str(&d.escape_identifier(&field.name(), IdentKind::Column));
            match field.pending_assign() {
                Some(expr) => {
                    sets.push_str(" = ");
                    sets.push_str(&expr.sql(d));
                    expr.bind_values(&mut values);
                }
                None => {
                    sets.push_str(" = ?");
                    values.push(field.to_storage());
                }
            }
        }
        if sets.is_empty() {
            return Ok(0);
        }

        let mut where_part = String::new();
        for (i, cond) in self.filters.iter().enumerate() {
            where_part.push_str(if i == 0 { " WHERE " } else { " AND " });
            where_part.push_str(&cond.sql(d));
            cond.bind_values(&mut values);
        }

        let sql = format!(
            "UPDATE {} AS T0 SET {}{}",
            d.escape_identifier(&self.model.table_name(), IdentKind::Table),
            sets,
            where_part
        );
        debug!(%sql, binds = values.len(), "updating rows");

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(|source| DbError::Prepare {
            sql: sql.clone(),
            source,
        })?;
        let affected = stmt
            .execute(params_from_iter(values.iter()))
            .map_err(|source| DbError::Execute {
                sql: sql.clone(),
                source,
            })?;
        Ok(affected)
    }

    /// Deletes from the root table. Joins are not emitted and predicate
    /// text referencing the root alias has the qualifier stripped, since
    /// an un-aliased DELETE target cannot be referenced by alias.
    pub fn delete(&mut self) -> Result<usize> {
        self.build(true);
        if self.executed {
            if self.poisoned {
                return Err(DbError::Unprepared {
                    sql: self.sql.clone(),
                });
            }
            return Ok(self.affected);
        }
        self.executed = true;
        if let Some(err) = self.build_failure.take() {
            self.poisoned = true;
            return Err(err);
        }

        let mut values = Vec::new();
        for cond in &self.filters {
            cond.bind_values(&mut values);
        }
        debug!(sql = %self.sql, binds = values.len(), "deleting rows");

        match self.run_execute(&values) {
            Ok(affected) => {
                self.affected = affected;
                Ok(affected)
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    /// Clears all accumulated state so the query set can be reused for a
    /// different statement.
    pub fn reset(&mut self) {
        self.filters.clear();
        self.projection.clear();
        self.excluded.clear();
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self.built = false;
        self.executed = false;
        self.poisoned = false;
        self.build_failure = None;
        self.sql.clear();
        self.selected.clear();
        self.rows.clear();
        self.affected = 0;
    }

    fn build(&mut self, for_delete: bool) {
        if self.built {
            return;
        }
        self.built = true;

        let joins = explore_joins(&self.model, &self.projection, &self.excluded);
        let d: &dyn Dialect = &self.dialect;

        let mut select_part = String::new();
        let mut from_part = String::new();

        if for_delete {
            // No alias on the delete target.
            from_part = d.escape_identifier(&self.model.table_name(), IdentKind::Table);
        } else {
            for (slot, join) in joins.iter().enumerate() {
                for field in join.model.fields() {
                    if !self.projection.is_empty()
                        && !self.projection.iter().any(|p| p == &field)
                    {
                        continue;
                    }
                    if !select_part.is_empty() {
                        select_part.push_str(", ");
                    }
                    select_part.push_str(&field.qualified_name(d));
                    self.selected.push(field);
                }

                let table = d.escape_identifier(&join.model.table_name(), IdentKind::Table);
                if slot == 0 {
                    from_part = format!("{table} AS T{slot}");
                } else {
                    let via = join.via.as_ref().expect("non-root join has a referrer");
                    let join_kind = if join.nullable { "LEFT" } else { "INNER" };
                    from_part.push_str(&format!(
                        " {} JOIN {} AS T{} ON {} = {}",
                        join_kind,
                        table,
                        slot,
                        join.model.pk().qualified_name(d),
                        via.qualified_name(d)
                    ));
                }
            }
        }

        let root_alias = format!("{}.", d.escape_identifier("T0", IdentKind::Table));
        let mut where_part = String::new();
        for (i, cond) in self.filters.iter().enumerate() {
            where_part.push_str(if i == 0 { " WHERE " } else { " AND " });
            let mut part = cond.sql(d);
            if for_delete {
                part = part.replace(&root_alias, "");
            }
            where_part.push_str(&part);
        }

        let mut tail = String::new();
        if !for_delete {
            for (i, (field, asc)) in self.order_by.iter().enumerate() {
                tail.push_str(if i == 0 { " ORDER BY " } else { ", " });
                tail.push_str(&field.qualified_name(d));
                tail.push_str(if *asc { " ASC" } else { " DESC" });
            }
            if let Some(limit) = self.limit {
                tail.push_str(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = self.offset {
                tail.push_str(&format!(" OFFSET {offset}"));
            }
        }

        self.sql = if for_delete {
            format!("DELETE FROM {from_part}{where_part}")
        } else {
            format!("SELECT {select_part} FROM {from_part}{where_part}{tail}")
        };
        debug!(sql = %self.sql, "built statement");

        // Validate preparation now; a failure leaves the query built but
        // unusable, surfaced on execution.
        match self.db.lock() {
            Ok(conn) => {
                if let Err(source) = conn.prepare(&self.sql).map(|_| ()) {
                    self.build_failure = Some(DbError::Prepare {
                        sql: self.sql.clone(),
                        source,
                    });
                }
            }
            Err(err) => self.build_failure = Some(err),
        }
    }

    fn exec(&mut self) -> Result<()> {
        if self.executed {
            if self.poisoned {
                return Err(DbError::Unprepared {
                    sql: self.sql.clone(),
                });
            }
            return Ok(());
        }
        self.executed = true;
        if let Some(err) = self.build_failure.take() {
            self.poisoned = true;
            return Err(err);
        }

        let mut values = Vec::new();
        for cond in &self.filters {
            cond.bind_values(&mut values);
        }
        debug!(sql = %self.sql, binds = values.len(), "executing statement");

        match self.run_query(&values) {
            Ok(rows) => {
                self.rows = rows;
                Ok(())
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn run_query(&self, values: &[Value]) -> Result<VecDeque<Vec<Value>>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&self.sql).map_err(|source| DbError::Prepare {
            sql: self.sql.clone(),
            source,
        })?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(values.iter()))
            .map_err(|source| DbError::Execute {
                sql: self.sql.clone(),
                source,
            })?;

        let mut buffered = VecDeque::new();
        loop {
            let row = rows.next().map_err(|source| DbError::Execute {
                sql: self.sql.clone(),
                source,
            })?;
            let Some(row) = row else { break };
            let mut record = Vec::with_capacity(column_count);
            for i in 0..column_count {
                record.push(row.get::<_, Value>(i).map_err(|source| DbError::Execute {
                    sql: self.sql.clone(),
                    source,
                })?);
            }
            buffered.push_back(record);
        }
        Ok(buffered)
    }

    fn run_execute(&self, values: &[Value]) -> Result<usize> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&self.sql).map_err(|source| DbError::Prepare {
            sql: self.sql.clone(),
            source,
        })?;
        stmt.execute(params_from_iter(values.iter()))
            .map_err(|source| DbError::Execute {
                sql: self.sql.clone(),
                source,
            })
    }
}
