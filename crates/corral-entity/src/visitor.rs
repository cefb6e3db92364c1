use corral_types::{Identifier, TypeError, Value};

use crate::cascade::Cascade;
use crate::holder::{ManyHolder, RefHolder};

/// The serializer capability: one callback per field category.
///
/// An [`Entity::accept`](crate::Entity::accept) implementation calls
/// exactly one of these methods per persistent field, in declaration
/// order. All methods default to no-ops so a visitor only overrides the
/// categories it cares about.
pub trait FieldVisitor {
    /// The primary-key field. At most one per entity.
    fn on_primary_key(&mut self, name: &str, id: &mut Identifier) {
        let _ = (name, id);
    }

    /// A plain attribute field.
    fn on_attribute(&mut self, name: &str, value: &mut dyn AttributeValue) {
        let _ = (name, value);
    }

    /// A belongs-to back-reference to the owning side of a relation.
    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        let _ = (name, holder, cascade);
    }

    /// A singular owned reference.
    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        let _ = (name, holder, cascade);
    }

    /// An owning container relation.
    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, cascade: Cascade) {
        let _ = (name, holder, cascade);
    }
}

/// A field value that can be moved in and out of a [`Value`].
///
/// Implemented for the primitive types entities store directly, plus
/// `Option<T>` of each (absent encodes as [`Value::Null`]).
pub trait AttributeValue {
    /// Capture the current value.
    fn get(&self) -> Value;

    /// Overwrite from a captured value; fails on kind mismatch.
    fn set(&mut self, value: Value) -> Result<(), TypeError>;
}

impl AttributeValue for bool {
    fn get(&self) -> Value {
        Value::Bool(*self)
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        *self = value.as_bool()?;
        Ok(())
    }
}

impl AttributeValue for i32 {
    fn get(&self) -> Value {
        Value::I64(i64::from(*self))
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        let wide = value.as_i64()?;
        *self = i32::try_from(wide).map_err(|_| TypeError::ValueKindMismatch {
            expected: "i32",
            actual: "i64",
        })?;
        Ok(())
    }
}

impl AttributeValue for i64 {
    fn get(&self) -> Value {
        Value::I64(*self)
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        *self = value.as_i64()?;
        Ok(())
    }
}

impl AttributeValue for u32 {
    fn get(&self) -> Value {
        Value::U64(u64::from(*self))
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        let wide = value.as_u64()?;
        *self = u32::try_from(wide).map_err(|_| TypeError::ValueKindMismatch {
            expected: "u32",
            actual: "u64",
        })?;
        Ok(())
    }
}

impl AttributeValue for u64 {
    fn get(&self) -> Value {
        Value::U64(*self)
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        *self = value.as_u64()?;
        Ok(())
    }
}

impl AttributeValue for f64 {
    fn get(&self) -> Value {
        Value::F64(*self)
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        *self = value.as_f64()?;
        Ok(())
    }
}

impl AttributeValue for String {
    fn get(&self) -> Value {
        Value::Text(self.clone())
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        *self = value.as_text()?.to_string();
        Ok(())
    }
}

impl AttributeValue for Vec<u8> {
    fn get(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        *self = value.as_bytes()?.to_vec();
        Ok(())
    }
}

impl<T: AttributeValue + Default> AttributeValue for Option<T> {
    fn get(&self) -> Value {
        match self {
            None => Value::Null,
            Some(v) => v.get(),
        }
    }

    fn set(&mut self, value: Value) -> Result<(), TypeError> {
        if matches!(value, Value::Null) {
            *self = None;
            return Ok(());
        }
        let mut inner = T::default();
        inner.set(value)?;
        *self = Some(inner);
        Ok(())
    }
}
