//! Macros for defining model types.
//!
//! [`define_model!`] generates a cheap-clone struct holding a
//! [`Model`](crate::Model) and typed field handles, plus its
//! [`Record`](crate::Record) impl.

/// Defines a model struct from a table name and a typed column list.
///
/// # Syntax
///
/// ```ignore
/// define_model! {
///     pub struct Person("person") {
///         name: StringField => "name",
///         age: IntField => "age",
///         manager: ForeignKey<Person> => "manager" [null],
///     }
/// }
/// ```
///
/// Each column maps a struct field to a field kind and a database column
/// name. Optional flags in brackets: `null` (accepts NULL), `pk`
/// (primary key), `auto` (auto-increment). Without a `pk` column an
/// auto-increment integer `id` is synthesized as the first field.
///
/// The generated struct implements [`Record`](crate::Record): `new()`
/// builds the model and its fields, `model()` exposes the underlying
/// [`Model`](crate::Model). Cloning shares all field storage.
#[macro_export]
macro_rules! define_model {
    (
        $vis:vis struct $name:ident($table:literal) {
            $($fname:ident : $ftype:ty => $col:literal $([$($flag:ident)+])?),+ $(,)?
        }
    ) => {
        #[derive(Clone)]
        $vis struct $name {
            model: $crate::Model,
            $(pub $fname: $ftype,)+
        }

        impl $crate::Record for $name {
            fn new() -> Self {
                let model = $crate::Model::new($table);
                $(
                    let $fname = <$ftype as $crate::fields::FieldKind>::create(&model, $col);
                    $($($crate::__field_flag!($fname, $flag);)+)?
                )+
                model.init();
                Self { model, $($fname,)+ }
            }

            fn model(&self) -> &$crate::Model {
                &self.model
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_flag {
    ($field:ident, null) => {
        $field.set_accepts_null(true);
    };
    ($field:ident, pk) => {
        $field.set_primary_key(true);
    };
    ($field:ident, auto) => {
        $field.set_auto_increment(true);
    };
}
