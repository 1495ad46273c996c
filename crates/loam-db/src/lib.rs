//! loam-db: a synchronous object-relational mapping layer for SQLite.
//!
//! Declarative models built from typed, reference-counted fields, a
//! composable expression language for filters ([`Where`]) and update
//! assignments ([`Assign`]), and a query-construction engine
//! ([`QuerySet`]) that explores a model's foreign-key graph, renders one
//! SELECT/UPDATE/DELETE statement and loads result rows back into the
//! model's fields. Everything is blocking and confined to one thread;
//! the connection handle ([`Database`]) is passed explicitly.

pub mod connection;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod fields;
pub mod macros;
pub mod model;
pub mod query;

pub use connection::Database;
pub use error::{DbError, Result};
pub use expr::{Assign, Where};
pub use fields::{
    DoubleField, Field, ForeignKey, IntField, StringField, TimestampField,
};
pub use model::{Model, Record};
pub use query::QuerySet;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;

    define_model! {
        pub struct Person("person") {
            name: StringField => "name",
            age: IntField => "age",
            manager: ForeignKey<Person> => "manager" [null],
        }
    }

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let person = Person::new();
        db.execute_batch(&person.model().create_table_sql(&SqliteDialect))
            .unwrap();
        db
    }

    fn insert_person(db: &Database, name: &str, age: i64) -> Person {
        let p = Person::new();
        p.name.set(name);
        p.age.set(age);
        p.model().save(db).unwrap();
        p
    }

    #[test]
    fn save_assigns_the_primary_key_and_rows_round_trip() {
        let db = setup_db();

        let alice = insert_person(&db, "Alice", 34);
        assert!(!alice.model().pk().is_null());

        let found = Person::new();
        let mut query = QuerySet::new(db.clone(), found.model())
            .filter(found.name.eq("Alice".to_string()));
        assert!(query.next().unwrap());
        assert_eq!(found.name.get().as_deref(), Some("Alice"));
        assert_eq!(found.age.get(), Some(34));
        assert!(!found.age.is_modified());
        assert!(!query.next().unwrap());
    }

    #[test]
    fn explicit_selection_builds_the_expected_join_shape() {
        let db = setup_db();

        let person = Person::new();
        let manager = person.manager.related();
        let mut query = QuerySet::new(db, person.model())
            .filter(person.name.eq("Alice".to_string()))
            .select(&person.name)
            .select(&manager.name);

        assert_eq!(
            query.sql(false),
            "SELECT \"T0\".\"name\", \"T1\".\"name\" FROM \"person\" AS T0 \
             LEFT JOIN \"person\" AS T1 ON \"T1\".\"id\" = \"T0\".\"manager\" \
             WHERE \"T0\".\"name\" = ?"
        );
    }

    #[test]
    fn root_only_selection_joins_nothing() {
        let db = setup_db();

        let person = Person::new();
        let _manager = person.manager.related(); // reachable, but not useful
        let mut query = QuerySet::new(db, person.model()).select(&person.name);

        assert_eq!(
            query.sql(false),
            "SELECT \"T0\".\"name\" FROM \"person\" AS T0"
        );
    }

    #[test]
    fn joined_select_loads_fields_at_the_right_ordinals() {
        let db = setup_db();

        let bob = insert_person(&db, "Bob", 55);
        let alice = Person::new();
        alice.name.set("Alice");
        alice.age.set(34);
        alice.manager.set(&bob);
        alice.model().save(&db).unwrap();

        let loaded = Person::new();
        let manager = loaded.manager.related();
        let mut query = QuerySet::new(db.clone(), loaded.model())
            .filter(loaded.name.eq("Alice".to_string()))
            .select(&loaded.name)
            .select(&manager.name);

        assert!(query.next().unwrap());
        assert_eq!(loaded.name.get().as_deref(), Some("Alice"));
        assert_eq!(manager.name.get().as_deref(), Some("Bob"));
    }

    #[test]
    fn left_join_keeps_rows_with_a_null_foreign_key() {
        let db = setup_db();
        insert_person(&db, "Carol", 41); // no manager

        let loaded = Person::new();
        let manager = loaded.manager.related();
        let mut query = QuerySet::new(db, loaded.model())
            .filter(loaded.name.eq("Carol".to_string()))
            .select(&loaded.name)
            .select(&manager.name);

        assert!(query.next().unwrap());
        assert_eq!(loaded.name.get().as_deref(), Some("Carol"));
        assert_eq!(manager.name.get(), None);
        assert!(manager.name.is_null());
    }

    #[test]
    fn foreign_key_fetches_lazily_by_primary_key() {
        let db = setup_db();

        let bob = insert_person(&db, "Bob", 55);
        let alice = Person::new();
        alice.name.set("Alice");
        alice.age.set(34);
        alice.manager.set(&bob);
        alice.model().save(&db).unwrap();

        let loaded = Person::new();
        let mut query = QuerySet::new(db.clone(), loaded.model())
            .filter(loaded.name.eq("Alice".to_string()));
        assert!(query.next().unwrap());

        let manager = loaded.manager.get(&db).unwrap();
        assert_eq!(manager.name.get().as_deref(), Some("Bob"));
        assert_eq!(manager.age.get(), Some(55));
        assert!(!manager.name.is_modified());

        // The cache is now consistent; another access must not refetch,
        // and overwriting the identifier must invalidate it.
        let again = loaded.manager.get(&db).unwrap();
        assert_eq!(again.name.get().as_deref(), Some("Bob"));

        loaded.manager.set_id(rusqlite::types::Value::Null);
        assert!(loaded.manager.is_null());
    }

    #[test]
    fn update_binds_set_values_before_where_values() {
        let db = setup_db();
        insert_person(&db, "Alice", 34);
        insert_person(&db, "Bob", 55);

        let p = Person::new();
        p.age.assign(Assign::field(&p.age) + Assign::value(1i64));
        let mut query =
            QuerySet::new(db.clone(), p.model()).filter(p.name.eq("Alice".to_string()));
        assert_eq!(query.update().unwrap(), 1);

        let check = Person::new();
        let mut query = QuerySet::new(db, check.model())
            .filter(check.name.eq("Alice".to_string()));
        assert!(query.next().unwrap());
        assert_eq!(check.age.get(), Some(35));
    }

    #[test]
    fn update_with_literal_values() {
        let db = setup_db();
        insert_person(&db, "Alice", 34);

        let p = Person::new();
        p.age.set(40);
        let mut query =
            QuerySet::new(db.clone(), p.model()).filter(p.name.eq("Alice".to_string()));
        assert_eq!(query.update().unwrap(), 1);

        let check = Person::new();
        let mut query = QuerySet::new(db, check.model())
            .filter(check.name.eq("Alice".to_string()));
        assert!(query.next().unwrap());
        assert_eq!(check.age.get(), Some(40));
    }

    #[test]
    fn update_with_nothing_modified_is_a_no_op() {
        // No table exists: if a statement were issued this would error.
        let db = Database::open_in_memory().unwrap();
        let p = Person::new();
        let mut query = QuerySet::new(db, p.model());
        assert_eq!(query.update().unwrap(), 0);
    }

    #[test]
    fn delete_strips_the_root_alias_but_not_others() {
        let db = setup_db();

        let person = Person::new();
        let manager = person.manager.related();
        let mut query = QuerySet::new(db, person.model())
            .filter(person.name.eq("A".to_string()))
            .filter(manager.name.eq("B".to_string()));

        let sql = query.sql(true).to_string();
        assert!(sql.starts_with("DELETE FROM \"person\" WHERE "));
        assert!(!sql.contains("\"T0\"."));
        assert!(sql.contains("\"name\" = ?"));
        assert!(sql.contains("\"T1\".\"name\" = ?"));
    }

    #[test]
    fn delete_removes_matching_rows() {
        let db = setup_db();
        insert_person(&db, "Alice", 34);
        insert_person(&db, "Bob", 55);

        let p = Person::new();
        let mut query =
            QuerySet::new(db.clone(), p.model()).filter(p.name.eq("Bob".to_string()));
        assert_eq!(query.delete().unwrap(), 1);

        let left = Person::new();
        let mut query = QuerySet::new(db, left.model());
        assert!(query.next().unwrap());
        assert_eq!(left.name.get().as_deref(), Some("Alice"));
        assert!(!query.next().unwrap());
    }

    #[test]
    fn ordering_limit_and_offset() {
        let db = setup_db();
        insert_person(&db, "Alice", 34);
        insert_person(&db, "Bob", 55);
        insert_person(&db, "Carol", 41);

        let p = Person::new();
        let mut query = QuerySet::new(db, p.model())
            .order_by(&p.age, false)
            .limit(2)
            .offset(1);

        assert!(query.next().unwrap());
        assert_eq!(p.name.get().as_deref(), Some("Carol"));
        assert!(query.next().unwrap());
        assert_eq!(p.name.get().as_deref(), Some("Alice"));
        assert!(!query.next().unwrap());
    }

    #[test]
    fn in_and_like_and_divisible_predicates_run_against_sqlite() {
        let db = setup_db();
        insert_person(&db, "Alice", 34);
        insert_person(&db, "Bob", 55);
        insert_person(&db, "Carol", 40);

        let p = Person::new();
        let mut query = QuerySet::new(db.clone(), p.model())
            .filter(p.age.in_(vec![34i64, 55]).and(p.name.like("%li%")));
        assert!(query.next().unwrap());
        assert_eq!(p.name.get().as_deref(), Some("Alice"));
        assert!(!query.next().unwrap());

        let q = Person::new();
        let mut query =
            QuerySet::new(db, q.model()).filter(q.age.divisible_by(5, 0));
        assert!(query.next().unwrap());
        assert_eq!(q.name.get().as_deref(), Some("Bob"));
        assert!(query.next().unwrap());
        assert_eq!(q.name.get().as_deref(), Some("Carol"));
        assert!(!query.next().unwrap());
    }

    #[test]
    fn a_failed_build_marks_the_query_unusable_but_built() {
        // No person table in this database, so preparation fails.
        let db = Database::open_in_memory().unwrap();
        let p = Person::new();
        let mut query =
            QuerySet::new(db, p.model()).filter(p.name.eq("A".to_string()));

        match query.next() {
            Err(DbError::Prepare { sql, .. }) => assert!(sql.contains("person")),
            other => panic!("expected a preparation failure, got {other:?}"),
        }
        // Subsequent calls fail cleanly instead of reusing stale state.
        assert!(query.next().is_err());
    }

    #[test]
    fn reset_allows_reuse_for_a_different_statement() {
        let db = setup_db();
        insert_person(&db, "Alice", 34);
        insert_person(&db, "Bob", 55);

        let p = Person::new();
        let mut query =
            QuerySet::new(db, p.model()).filter(p.name.eq("Alice".to_string()));
        assert!(query.next().unwrap());
        assert!(!query.next().unwrap());

        query.reset();
        let mut query = query.filter(p.age.gt(50i64));
        assert!(query.next().unwrap());
        assert_eq!(p.name.get().as_deref(), Some("Bob"));
    }

    #[test]
    fn file_backed_database_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("loam.db")).unwrap();
        let person = Person::new();
        db.execute_batch(&person.model().create_table_sql(&SqliteDialect))
            .unwrap();

        insert_person(&db, "Alice", 34);

        let found = Person::new();
        let mut query = QuerySet::new(db, found.model())
            .filter(found.name.eq("Alice".to_string()));
        assert!(query.next().unwrap());
        assert_eq!(found.age.get(), Some(34));
    }

    #[test]
    fn model_remove_deletes_by_primary_key_and_nulls_it() {
        let db = setup_db();
        let alice = insert_person(&db, "Alice", 34);

        alice.model().remove(&db).unwrap();
        assert!(alice.model().pk().is_null());

        let any = Person::new();
        let mut query = QuerySet::new(db, any.model());
        assert!(!query.next().unwrap());
    }
}
