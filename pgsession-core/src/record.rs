//! Debug rendering for model records
//!
//! Model types implement [`Record`] to list their fields explicitly. A field
//! is either a plain displayable value or a *tracked* slot: ORM state,
//! relationship loaders and similar bookkeeping. Tracked slots are never
//! read when rendering, so printing a record cannot trigger a lazy load or
//! recurse through relationships.
//!
//! ```
//! use pgsession_core::impl_record;
//!
//! struct User {
//!     id: i64,
//!     name: String,
//!     _state: (),
//! }
//!
//! impl_record!(User { id, name } internal { _state });
//!
//! let user = User { id: 1, name: "x".into(), _state: () };
//! assert_eq!(format!("{:?}", user), "User(id=1, name=x)");
//! ```

use std::fmt::{self, Display, Write as _};

/// One entry of a record's field list
pub enum Field<'a> {
    Value {
        name: &'static str,
        value: &'a dyn Display,
    },
    /// State-tracking or loader slot; listed but never rendered
    Tracked { name: &'static str },
}

impl<'a> Field<'a> {
    pub fn value(name: &'static str, value: &'a dyn Display) -> Self {
        Self::Value { name, value }
    }

    pub fn tracked(name: &'static str) -> Self {
        Self::Tracked { name }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Value { name, .. } | Self::Tracked { name } => name,
        }
    }

    fn is_rendered(&self) -> bool {
        matches!(self, Self::Value { .. }) && !self.name().starts_with('_')
    }
}

/// Marker for model records with an explicit field list.
pub trait Record {
    fn type_name(&self) -> &'static str;

    /// Fields in declaration order.
    fn fields(&self) -> Vec<Field<'_>>;
}

/// Render `TypeName(a=1, b=2)` from the public, untracked fields.
pub fn render_record<R: Record + ?Sized>(record: &R) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_record(&mut out, record);
    out
}

/// Write the rendering of `record` into any formatter sink.
pub fn write_record<W, R>(out: &mut W, record: &R) -> fmt::Result
where
    W: fmt::Write,
    R: Record + ?Sized,
{
    write!(out, "{}(", record.type_name())?;
    let mut first = true;
    for field in record.fields().iter().filter(|f| f.is_rendered()) {
        if let Field::Value { name, value } = field {
            if !first {
                out.write_str(", ")?;
            }
            write!(out, "{}={}", name, value)?;
            first = false;
        }
    }
    out.write_char(')')
}

/// Implement [`Record`] and a matching `Debug` for a struct.
///
/// Fields in the first group must implement `Display`. Fields after
/// `internal` are listed as tracked slots and never read.
#[macro_export]
macro_rules! impl_record {
    ($ty:ident { $($field:ident),* $(,)? } $(internal { $($tracked:ident),* $(,)? })?) => {
        impl $crate::record::Record for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn fields(&self) -> ::std::vec::Vec<$crate::record::Field<'_>> {
                ::std::vec![
                    $($crate::record::Field::value(stringify!($field), &self.$field),)*
                    $($($crate::record::Field::tracked(stringify!($tracked)),)*)?
                ]
            }
        }

        impl ::std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                $crate::record::write_record(f, self)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Order {
        id: i32,
        total: f64,
    }

    /// Loader that records whether anything touched it.
    struct LazyOrders {
        loaded: Cell<bool>,
    }

    impl Display for LazyOrders {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.loaded.set(true);
            f.write_str("[...]")
        }
    }

    struct Customer {
        name: String,
        id: i64,
        _internal_note: String,
        orders: LazyOrders,
        state: (),
    }

    impl Record for Customer {
        fn type_name(&self) -> &'static str {
            "Customer"
        }

        fn fields(&self) -> Vec<Field<'_>> {
            vec![
                Field::value("name", &self.name),
                Field::value("id", &self.id),
                Field::value("_internal_note", &self._internal_note),
                Field::tracked("orders"),
                Field::tracked("_sa_instance_state"),
            ]
        }
    }

    impl_record!(Order { id, total });

    fn customer() -> Customer {
        Customer {
            name: "x".into(),
            id: 1,
            _internal_note: "hidden".into(),
            orders: LazyOrders {
                loaded: Cell::new(false),
            },
            state: (),
        }
    }

    #[test]
    fn renders_public_fields_in_order() {
        let c = customer();
        assert_eq!(render_record(&c), "Customer(name=x, id=1)");
        let _ = c.state;
    }

    #[test]
    fn tracked_slots_are_never_touched() {
        let c = customer();
        let _ = render_record(&c);
        assert!(!c.orders.loaded.get());
    }

    #[test]
    fn underscore_values_are_skipped() {
        let rendered = render_record(&customer());
        assert!(!rendered.contains("hidden"));
        assert!(!rendered.contains("_sa_instance_state"));
    }

    #[test]
    fn macro_generates_debug() {
        let order = Order { id: 7, total: 9.5 };
        assert_eq!(format!("{:?}", order), "Order(id=7, total=9.5)");
    }

    #[test]
    fn empty_record() {
        struct Empty;
        impl_record!(Empty {});
        assert_eq!(format!("{:?}", Empty), "Empty()");
    }
}
