//! Record instances: fixed-layout slot storage plus construction from
//! positional and named arguments with defaults.

use crate::{
    error::{bail, ensure, error, Result},
    freelist,
    struct_meta::StructMeta,
    value::Value,
};
use std::{
    collections::hash_map::DefaultHasher,
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    mem,
    sync::Arc,
};

/// An instance of a record type: one slot per field, in the field order of
/// its [`StructMeta`].
pub struct StructInstance {
    meta: Arc<StructMeta>,
    slots: Vec<Value>,
}

impl StructInstance {
    pub(crate) fn from_raw(meta: Arc<StructMeta>, slots: Vec<Value>) -> Self {
        debug_assert_eq!(meta.n_fields(), slots.len());
        StructInstance { meta, slots }
    }

    /// Reassemble an instance from parts, validating the slot count.
    pub fn from_parts(meta: Arc<StructMeta>, slots: Vec<Value>) -> Result<Self> {
        ensure!(
            slots.len() == meta.n_fields(),
            Schema,
            "struct '{}' has {} fields, got {} values",
            meta.name(),
            meta.n_fields(),
            slots.len(),
        );
        Ok(StructInstance { meta, slots })
    }

    /// Split into metadata and field values (the reduction used for
    /// persistence-style protocols).
    pub fn into_parts(mut self) -> (Arc<StructMeta>, Vec<Value>) {
        (self.meta.clone(), mem::take(&mut self.slots))
    }

    pub fn meta(&self) -> &Arc<StructMeta> {
        &self.meta
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.slots.get(self.meta.field_index(name)?)
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        ensure!(
            !self.meta.config().immutable,
            Schema,
            "cannot mutate immutable struct '{}'",
            self.meta.name(),
        );
        ensure!(
            index < self.slots.len(),
            Schema,
            "struct '{}' has no field at index {}",
            self.meta.name(),
            index,
        );
        self.slots[index] = value;
        Ok(())
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        let index = self.meta.field_index(name).ok_or_else(|| {
            error!(
                Schema,
                "struct '{}' has no field `{}`",
                self.meta.name(),
                name,
            )
        })?;
        self.set(index, value)
    }

    /// Tuple-style hash over the field values. Only immutable record types
    /// are hashable.
    pub fn hash_code(&self) -> Result<u64> {
        ensure!(
            self.meta.config().immutable,
            Schema,
            "struct '{}' is not immutable and therefore not hashable",
            self.meta.name(),
        );
        let mut hasher = DefaultHasher::new();
        Arc::as_ptr(&self.meta).hash(&mut hasher);
        for slot in &self.slots {
            hash_value(slot, &mut hasher);
        }
        Ok(hasher.finish())
    }
}

impl Drop for StructInstance {
    fn drop(&mut self) {
        freelist::release(mem::take(&mut self.slots));
    }
}

impl Clone for StructInstance {
    fn clone(&self) -> Self {
        let mut slots = freelist::acquire(self.slots.len());
        slots.extend(self.slots.iter().cloned());
        StructInstance {
            meta: self.meta.clone(),
            slots,
        }
    }
}

impl PartialEq for StructInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.meta, &other.meta) && self.slots == other.slots
    }
}

impl Debug for StructInstance {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut s = f.debug_struct(self.meta.name());
        for (field, slot) in self.meta.fields().iter().zip(&self.slots) {
            s.field(&field.name, slot);
        }
        s.finish()
    }
}

fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    mem::discriminant(value).hash(hasher);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(hasher),
        Value::Int(n) => n.hash(hasher),
        Value::Float(f) => f.to_bits().hash(hasher),
        Value::Str(s) => s.hash(hasher),
        Value::Bytes(b) | Value::ByteArray(b) => b.hash(hasher),
        Value::DateTime(dt) => {
            dt.timestamp().hash(hasher);
            dt.timestamp_subsec_nanos().hash(hasher);
        }
        Value::Ext(code, payload) => {
            code.hash(hasher);
            payload.hash(hasher);
        }
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Dict(pairs) => {
            for (k, v) in pairs {
                hash_value(k, hasher);
                hash_value(v, hasher);
            }
        }
        Value::Struct(inst) => {
            Arc::as_ptr(inst.meta()).hash(hasher);
            for slot in inst.slots() {
                hash_value(slot, hasher);
            }
        }
        Value::Enum(e) => {
            Arc::as_ptr(e.meta()).hash(hasher);
            e.name().hash(hasher);
        }
        Value::Custom(cv) => {
            Arc::as_ptr(cv.custom_type()).hash(hasher);
        }
    }
}

/// Copy a default into a fresh instance slot.
///
/// `Value` is fully owned, so a clone is already deep: mutable collection
/// defaults never share storage between instances, and scalar defaults
/// cost a plain copy.
pub(crate) fn materialize_default(default: &Value) -> Value {
    default.clone()
}

pub(crate) fn run_post_init(instance: &StructInstance) -> Result<()> {
    if let Some(hook) = instance.meta().post_init() {
        hook(instance).map_err(|message| error!(Validation, "{}", message))?;
    }
    Ok(())
}

impl StructMeta {
    /// Build an instance from positional and named arguments, filling
    /// defaults for trailing optional fields.
    pub fn construct(
        self: &Arc<Self>,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<StructInstance> {
        let n = self.n_fields();
        ensure!(
            positional.len() <= n,
            Schema,
            "struct '{}' takes at most {} arguments, got {}",
            self.name(),
            n,
            positional.len(),
        );

        let mut named: Vec<(String, Option<Value>)> = named
            .into_iter()
            .map(|(name, value)| (name, Some(value)))
            .collect();
        let mut positional = positional.into_iter();

        let mut slots = freelist::acquire(n);
        for field in self.fields() {
            let by_name = named
                .iter_mut()
                .find(|(name, _)| *name == field.name)
                .map(|(_, value)| value);
            let value = match positional.next() {
                Some(value) => {
                    if by_name.is_some() {
                        bail!(
                            Schema,
                            "struct '{}' got multiple values for argument `{}`",
                            self.name(),
                            field.name,
                        );
                    }
                    value
                }
                None => match by_name.and_then(Option::take) {
                    Some(value) => value,
                    None => match &field.default {
                        Some(default) => materialize_default(default),
                        None => bail!(
                            Schema,
                            "struct '{}' missing required argument `{}`",
                            self.name(),
                            field.name,
                        ),
                    },
                },
            };
            slots.push(value);
        }

        if let Some((name, _)) = named.iter().find(|(_, value)| value.is_some()) {
            bail!(
                Schema,
                "struct '{}' got an unexpected keyword argument `{}`",
                self.name(),
                name,
            );
        }

        let instance = StructInstance::from_raw(self.clone(), slots);
        run_post_init(&instance)?;
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typedesc;

    fn user_meta() -> Arc<StructMeta> {
        StructMeta::builder("User")
            .field("name", typedesc!(str))
            .field_default("groups", typedesc!(set(str)), Value::Set(Vec::new()))
            .field_default("email", typedesc!(option(str)), Value::Null)
            .build()
            .unwrap()
    }

    #[test]
    fn test_construct_positional_and_named() {
        let meta = user_meta();
        let user = meta
            .construct(
                vec![Value::from("alice")],
                vec![("email".to_owned(), Value::from("a@example.com"))],
            )
            .unwrap();
        assert_eq!(user.field("name"), Some(&Value::from("alice")));
        assert_eq!(user.field("groups"), Some(&Value::Set(Vec::new())));
        assert_eq!(user.field("email"), Some(&Value::from("a@example.com")));
    }

    #[test]
    fn test_construct_missing_required() {
        let meta = user_meta();
        let err = meta.construct(Vec::new(), Vec::new()).unwrap_err();
        assert!(err.message().contains("`name`"));
    }

    #[test]
    fn test_construct_duplicate_argument() {
        let meta = user_meta();
        let err = meta
            .construct(
                vec![Value::from("alice")],
                vec![("name".to_owned(), Value::from("bob"))],
            )
            .unwrap_err();
        assert!(err.message().contains("multiple values"));
    }

    #[test]
    fn test_construct_extra_keyword() {
        let meta = user_meta();
        let err = meta
            .construct(
                vec![Value::from("alice")],
                vec![("admin".to_owned(), Value::Bool(true))],
            )
            .unwrap_err();
        assert!(err.message().contains("`admin`"));
    }

    #[test]
    fn test_defaults_not_shared() {
        let meta = user_meta();
        let mut a = meta.construct(vec![Value::from("a")], Vec::new()).unwrap();
        let b = meta.construct(vec![Value::from("b")], Vec::new()).unwrap();
        if let Some(Value::Set(_)) = a.field("groups") {
            a.set_field("groups", Value::Set(vec![Value::from("admin")]))
                .unwrap();
        }
        assert_eq!(b.field("groups"), Some(&Value::Set(Vec::new())));
    }

    #[test]
    fn test_immutable_rejects_mutation_and_hashes() {
        let meta = StructMeta::builder("Point")
            .field("x", typedesc!(float))
            .field("y", typedesc!(float))
            .immutable(true)
            .build()
            .unwrap();
        let mut p = meta
            .construct(vec![Value::Float(1.5), Value::Float(2.0)], Vec::new())
            .unwrap();
        assert!(p.set_field("x", Value::Float(3.0)).is_err());
        let q = meta
            .construct(vec![Value::Float(1.5), Value::Float(2.0)], Vec::new())
            .unwrap();
        assert_eq!(p.hash_code().unwrap(), q.hash_code().unwrap());
        assert_eq!(p, q);
    }

    #[test]
    fn test_post_init_wraps_into_validation() {
        let meta = StructMeta::builder("Positive")
            .field("n", typedesc!(int))
            .post_init(|inst| {
                match inst.field("n") {
                    Some(&Value::Int(n)) if n > 0 => Ok(()),
                    _ => Err("n must be positive".to_owned()),
                }
            })
            .build()
            .unwrap();
        let err = meta
            .construct(vec![Value::Int(-3)], Vec::new())
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.message().contains("positive"));
    }

    #[test]
    fn test_parts_round_trip() {
        let meta = user_meta();
        let user = meta
            .construct(vec![Value::from("alice")], Vec::new())
            .unwrap();
        let (meta2, slots) = user.clone().into_parts();
        let rebuilt = StructInstance::from_parts(meta2, slots).unwrap();
        assert_eq!(rebuilt, user);
        assert!(StructInstance::from_parts(meta, Vec::new()).is_err());
    }
}
