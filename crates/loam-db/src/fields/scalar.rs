//! Typed wrappers over the scalar field kinds.
//!
//! Each wrapper derefs to [`Field`], so the flag setters and predicate
//! builders are available directly on the wrapper.

use std::ops::Deref;

use chrono::{DateTime, Utc};

use crate::fields::{Field, FieldKind, Payload};
use crate::model::Model;

macro_rules! scalar_field {
    ($(#[$doc:meta])* $name:ident, $payload:expr, $ty:ty, $set:ident, $get:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug)]
        pub struct $name(Field);

        impl $name {
            /// Sets the value, marking the field modified and non-null.
            pub fn set(&self, value: impl Into<$ty>) {
                self.0.$set(value.into());
            }

            /// The current value, `None` when the field is null.
            pub fn get(&self) -> Option<$ty> {
                self.0.$get()
            }
        }

        impl FieldKind for $name {
            fn create(model: &Model, name: &str) -> Self {
                let field = Field::new(model, name, $payload);
                model.add_field(field.clone());
                $name(field)
            }
        }

        impl Deref for $name {
            type Target = Field;

            fn deref(&self) -> &Field {
                &self.0
            }
        }
    };
}

scalar_field!(
    /// An integer column.
    IntField,
    Payload::Int(0),
    i64,
    set_int,
    int_value
);

scalar_field!(
    /// A text column.
    StringField,
    Payload::Str(String::new()),
    String,
    set_string,
    string_value
);

scalar_field!(
    /// A floating-point column.
    DoubleField,
    Payload::Double(0.0),
    f64,
    set_double,
    double_value
);

scalar_field!(
    /// A UTC timestamp column, stored as RFC 3339 text.
    TimestampField,
    Payload::Timestamp(None),
    DateTime<Utc>,
    set_timestamp,
    timestamp_value
);
