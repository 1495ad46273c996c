//! Boolean filter predicates.
//!
//! A [`Where`] is an immutable tree of predicate nodes. Each node renders
//! one SQL fragment and contributes zero or more bind values; composite
//! nodes concatenate their children's contributions depth-first,
//! left-to-right, so the bind list always lines up with the `?`
//! placeholders in the rendered text.

use std::rc::Rc;

use rusqlite::types::Value;

use crate::dialect::Dialect;
use crate::expr::CompareOp;
use crate::fields::Field;

/// A boolean predicate over model fields.
///
/// Built from the comparison methods on [`Field`] (`eq`, `lt`, `like`,
/// `in_`, …) and combined with [`and`](Where::and), [`or`](Where::or) and
/// [`not`](Where::not). Cloning shares the underlying tree.
#[derive(Clone)]
pub struct Where(Rc<Node>);

enum Node {
    /// `field OP ?`, contributing one bind value.
    Compare {
        field: Field,
        op: CompareOp,
        value: Value,
    },
    /// `left OP right`, contributing no bind values.
    CompareField {
        left: Field,
        op: CompareOp,
        right: Field,
    },
    /// `field IN (?, ?, ...)`, one bind value per element.
    In { field: Field, values: Vec<Value> },
    /// `field LIKE ?`, binding the raw pattern.
    Like { field: Field, pattern: String },
    /// `((field + ?) % ? = 0)`, binding offset then divisor.
    DivisibleBy {
        field: Field,
        divisor: i64,
        offset: i64,
    },
    /// `((field & ?) != 0)`, binding the flag.
    FlagSet { field: Field, flag: i64 },
    /// `field IS NULL`, contributing no bind values.
    IsNull { field: Field },
    Not(Where),
    And(Where, Where),
    Or(Where, Where),
}

impl Where {
    pub(crate) fn compare(field: &Field, op: CompareOp, value: Value) -> Self {
        Where(Rc::new(Node::Compare {
            field: field.clone(),
            op,
            value,
        }))
    }

    pub(crate) fn compare_field(left: &Field, op: CompareOp, right: &Field) -> Self {
        Where(Rc::new(Node::CompareField {
            left: left.clone(),
            op,
            right: right.clone(),
        }))
    }

    pub(crate) fn in_list(field: &Field, values: Vec<Value>) -> Self {
        Where(Rc::new(Node::In {
            field: field.clone(),
            values,
        }))
    }

    pub(crate) fn like(field: &Field, pattern: String) -> Self {
        Where(Rc::new(Node::Like {
            field: field.clone(),
            pattern,
        }))
    }

    pub(crate) fn divisible_by(field: &Field, divisor: i64, offset: i64) -> Self {
        Where(Rc::new(Node::DivisibleBy {
            field: field.clone(),
            divisor,
            offset,
        }))
    }

    pub(crate) fn flag_set(field: &Field, flag: i64) -> Self {
        Where(Rc::new(Node::FlagSet {
            field: field.clone(),
            flag,
        }))
    }

    pub(crate) fn is_null(field: &Field) -> Self {
        Where(Rc::new(Node::IsNull {
            field: field.clone(),
        }))
    }

    /// Combines two predicates with `AND`.
    pub fn and(self, other: Where) -> Where {
        Where(Rc::new(Node::And(self, other)))
    }

    /// Combines two predicates with `OR`.
    pub fn or(self, other: Where) -> Where {
        Where(Rc::new(Node::Or(self, other)))
    }

    /// Negates the predicate.
    pub fn not(self) -> Where {
        Where(Rc::new(Node::Not(self)))
    }

    /// Renders the predicate as SQL text with `?` placeholders.
    ///
    /// Pure: the same tree and dialect always produce the same text.
    pub fn sql(&self, dialect: &dyn Dialect) -> String {
        match &*self.0 {
            Node::Compare { field, op, .. } => {
                format!("{} {} ?", field.qualified_name(dialect), op.sql())
            }
            Node::CompareField { left, op, right } => format!(
                "{} {} {}",
                left.qualified_name(dialect),
                op.sql(),
                right.qualified_name(dialect)
            ),
            Node::In { field, values } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                format!("{} IN ({})", field.qualified_name(dialect), placeholders)
            }
            Node::Like { field, .. } => {
                format!("{} LIKE ?", field.qualified_name(dialect))
            }
            Node::DivisibleBy { field, .. } => {
                format!("(({} + ?) % ? = 0)", field.qualified_name(dialect))
            }
            Node::FlagSet { field, .. } => {
                format!("(({} & ?) != 0)", field.qualified_name(dialect))
            }
            Node::IsNull { field } => {
                format!("{} IS NULL", field.qualified_name(dialect))
            }
            Node::Not(inner) => format!("NOT ({})", inner.sql(dialect)),
            Node::And(left, right) => {
                format!("({}) AND ({})", left.sql(dialect), right.sql(dialect))
            }
            Node::Or(left, right) => {
                format!("({}) OR ({})", left.sql(dialect), right.sql(dialect))
            }
        }
    }

    /// Appends the predicate's bind values to `values`, in placeholder
    /// order.
    pub fn bind_values(&self, values: &mut Vec<Value>) {
        match &*self.0 {
            Node::Compare { value, .. } => values.push(value.clone()),
            Node::CompareField { .. } => {}
            Node::In { values: list, .. } => values.extend(list.iter().cloned()),
            Node::Like { pattern, .. } => values.push(Value::Text(pattern.clone())),
            Node::DivisibleBy {
                divisor, offset, ..
            } => {
                values.push(Value::Integer(*offset));
                values.push(Value::Integer(*divisor));
            }
            Node::FlagSet { flag, .. } => values.push(Value::Integer(*flag)),
            Node::IsNull { .. } => {}
            Node::Not(inner) => inner.bind_values(values),
            Node::And(left, right) | Node::Or(left, right) => {
                left.bind_values(values);
                right.bind_values(values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::model::Model;

    fn test_model() -> Model {
        let model = Model::new("person");
        model.int_field("age");
        model.string_field("name");
        model.init();
        model
    }

    #[test]
    fn render_is_pure_and_bind_order_is_stable() {
        let model = test_model();
        let age = model.field_named("age").unwrap();
        let name = model.field_named("name").unwrap();

        let cond = age
            .gt(18i64)
            .and(name.like("%li%"))
            .or(age.in_(vec![1i64, 2, 3]).not());

        let d = SqliteDialect;
        let first = cond.sql(&d);
        let second = cond.sql(&d);
        assert_eq!(first, second);

        let mut a = Vec::new();
        let mut b = Vec::new();
        cond.bind_values(&mut a);
        cond.bind_values(&mut b);
        assert_eq!(a, b);
        assert_eq!(
            a,
            vec![
                Value::Integer(18),
                Value::Text("%li%".into()),
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
            ]
        );
        assert_eq!(first.matches('?').count(), a.len());
    }

    #[test]
    fn special_predicates_render_their_exact_shapes() {
        let model = test_model();
        let age = model.field_named("age").unwrap();
        let d = SqliteDialect;

        assert_eq!(
            age.divisible_by(7, 2).sql(&d),
            "((\"T0\".\"age\" + ?) % ? = 0)"
        );
        let mut values = Vec::new();
        age.divisible_by(7, 2).bind_values(&mut values);
        assert_eq!(values, vec![Value::Integer(2), Value::Integer(7)]);

        assert_eq!(age.has_flag(4).sql(&d), "((\"T0\".\"age\" & ?) != 0)");
        assert_eq!(age.null().sql(&d), "\"T0\".\"age\" IS NULL");
    }

    #[test]
    fn field_to_field_comparison_has_no_binds() {
        let model = test_model();
        let age = model.field_named("age").unwrap();
        let name = model.field_named("name").unwrap();

        let cond = age.eq_field(&name);
        assert_eq!(cond.sql(&SqliteDialect), "\"T0\".\"age\" = \"T0\".\"name\"");
        let mut values = Vec::new();
        cond.bind_values(&mut values);
        assert!(values.is_empty());
    }
}
