//! Value expressions for UPDATE assignments.
//!
//! An [`Assign`] describes the right-hand side of a `SET column = …`
//! clause: a field reference, a constant, or an arithmetic combination of
//! the two. A field carrying a pending `Assign` is updated from the
//! expression instead of its literal value.

use std::ops;
use std::rc::Rc;

use rusqlite::types::Value;

use crate::dialect::Dialect;
use crate::expr::ArithOp;
use crate::fields::Field;

/// A value expression. Cloning shares the underlying tree.
#[derive(Clone)]
pub struct Assign(Rc<Node>);

enum Node {
    Field(Field),
    Value(Value),
    Op {
        left: Assign,
        op: ArithOp,
        right: Assign,
    },
}

impl Assign {
    /// An expression referencing a column.
    pub fn field(field: &Field) -> Self {
        Assign(Rc::new(Node::Field(field.clone())))
    }

    /// A constant expression, bound as a placeholder.
    pub fn value<V: Into<Value>>(value: V) -> Self {
        Assign(Rc::new(Node::Value(value.into())))
    }

    /// Renders the expression as SQL text with `?` placeholders. Pure.
    pub fn sql(&self, dialect: &dyn Dialect) -> String {
        match &*self.0 {
            Node::Field(field) => field.qualified_name(dialect),
            Node::Value(_) => "?".to_string(),
            Node::Op { left, op, right } => {
                format!("({}) {} ({})", left.sql(dialect), op.sql(), right.sql(dialect))
            }
        }
    }

    /// Appends the expression's bind values to `values`, in placeholder
    /// order.
    pub fn bind_values(&self, values: &mut Vec<Value>) {
        match &*self.0 {
            Node::Field(_) => {}
            Node::Value(v) => values.push(v.clone()),
            Node::Op { left, right, .. } => {
                left.bind_values(values);
                right.bind_values(values);
            }
        }
    }

    fn combine(self, op: ArithOp, right: Assign) -> Assign {
        Assign(Rc::new(Node::Op {
            left: self,
            op,
            right,
        }))
    }
}

impl ops::Add for Assign {
    type Output = Assign;

    fn add(self, rhs: Assign) -> Assign {
        self.combine(ArithOp::Add, rhs)
    }
}

impl ops::Sub for Assign {
    type Output = Assign;

    fn sub(self, rhs: Assign) -> Assign {
        self.combine(ArithOp::Sub, rhs)
    }
}

impl ops::Mul for Assign {
    type Output = Assign;

    fn mul(self, rhs: Assign) -> Assign {
        self.combine(ArithOp::Mul, rhs)
    }
}

impl ops::Div for Assign {
    type Output = Assign;

    fn div(self, rhs: Assign) -> Assign {
        self.combine(ArithOp::Div, rhs)
    }
}
