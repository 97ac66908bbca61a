//! Metadata for user-declared record types: ordered named fields with
//! defaults, inheritance merging, configuration flags, and the field lookup
//! the decoders use.

use crate::{
    desc::{build_type_node, TypeDesc},
    error::{ensure, error, Result},
    instance::StructInstance,
    schema::TypeNode,
    value::Value,
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, OnceLock},
};
use tracing::debug;

/// Post-construction validation hook. Runs after all fields are set, both
/// on `construct` and on decode; a returned message becomes a validation
/// error.
pub type PostInitFn =
    Arc<dyn Fn(&StructInstance) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructConfig {
    /// Disallow field mutation and enable hashing.
    pub immutable: bool,
    /// Encode as an ordered array of field values instead of a name-keyed
    /// map (MessagePack only; JSON records are always objects).
    pub array_like: bool,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub desc: TypeDesc,
    /// Fields without a default are required.
    pub default: Option<Value>,
}

/// Per-record-type metadata. Immutable after [`StructBuilder::build`];
/// the per-field schemas are built once, on first codec use, so record
/// types may reference each other (and themselves) freely.
///
/// Field order is storage order: after inheritance merging, required
/// fields precede optional ones, and a field's index is its slot offset
/// in the instance.
pub struct StructMeta {
    name: String,
    fields: Vec<FieldDef>,
    n_required: usize,
    config: StructConfig,
    post_init: Option<PostInitFn>,
    field_types: OnceLock<Vec<TypeNode>>,
}

impl StructMeta {
    pub fn builder(name: impl Into<String>) -> StructBuilder {
        StructBuilder {
            name: name.into(),
            bases: Vec::new(),
            fields: Vec::new(),
            config: StructConfig::default(),
            post_init: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// Number of leading fields without a default.
    pub fn n_required(&self) -> usize {
        self.n_required
    }

    pub fn config(&self) -> StructConfig {
        self.config
    }

    pub(crate) fn post_init(&self) -> Option<&PostInitFn> {
        self.post_init.as_ref()
    }

    /// Per-field schemas, built on first use.
    pub(crate) fn field_types(&self) -> Result<&[TypeNode]> {
        if let Some(types) = self.field_types.get() {
            return Ok(types);
        }
        let mut types = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            types.push(build_type_node(&field.desc).map_err(|e| {
                error!(
                    Schema,
                    "field `{}.{}`: {}",
                    self.name,
                    field.name,
                    e.message(),
                )
            })?);
        }
        debug!(struct_name = %self.name, "built field schemas");
        Ok(self.field_types.get_or_init(|| types))
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field lookup with a rolling hint: the scan starts at the position
    /// just after the previous hit and wraps. Keys arriving in declared
    /// order (the common case) resolve in amortised O(1).
    pub(crate) fn field_index_hint(
        &self,
        name: &str,
        hint: &mut usize,
    ) -> Option<usize> {
        let n = self.fields.len();
        if n == 0 {
            return None;
        }
        let start = if *hint >= n { 0 } else { *hint };
        for i in (start..n).chain(0..start) {
            if self.fields[i].name == name {
                *hint = (i + 1) % n;
                return Some(i);
            }
        }
        None
    }
}

impl Debug for StructMeta {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("StructMeta")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("n_required", &self.n_required)
            .field("config", &self.config)
            .finish()
    }
}

pub struct StructBuilder {
    name: String,
    bases: Vec<Arc<StructMeta>>,
    fields: Vec<FieldDef>,
    config: StructConfig,
    post_init: Option<PostInitFn>,
}

impl StructBuilder {
    /// Add a base record type. Fields of earlier bases come first; later
    /// bases (and finally the declared fields) override same-named fields
    /// in place.
    pub fn base(mut self, base: &Arc<StructMeta>) -> Self {
        self.bases.push(base.clone());
        self
    }

    /// Declare a required field.
    pub fn field(mut self, name: impl Into<String>, desc: TypeDesc) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            desc,
            default: None,
        });
        self
    }

    /// Declare an optional field with a default.
    pub fn field_default(
        mut self,
        name: impl Into<String>,
        desc: TypeDesc,
        default: Value,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            desc,
            default: Some(default),
        });
        self
    }

    pub fn immutable(mut self, immutable: bool) -> Self {
        self.config.immutable = immutable;
        self
    }

    pub fn array_like(mut self, array_like: bool) -> Self {
        self.config.array_like = array_like;
        self
    }

    pub fn post_init(
        mut self,
        hook: impl Fn(&StructInstance) -> std::result::Result<(), String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.post_init = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Arc<StructMeta>> {
        for (i, field) in self.fields.iter().enumerate() {
            ensure!(
                !self.fields[..i].iter().any(|f| f.name == field.name),
                Schema,
                "duplicate field `{}` in struct '{}'",
                field.name,
                self.name,
            );
        }

        let mut merged: Vec<FieldDef> = Vec::new();
        let mut override_field = |merged: &mut Vec<FieldDef>, field: &FieldDef| {
            match merged.iter().position(|f| f.name == field.name) {
                Some(i) => merged[i] = field.clone(),
                None => merged.push(field.clone()),
            }
        };
        for base in &self.bases {
            for field in base.fields() {
                override_field(&mut merged, field);
            }
        }
        for field in &self.fields {
            override_field(&mut merged, field);
        }

        // stable partition: all required precede all optional
        let (required, optional): (Vec<FieldDef>, Vec<FieldDef>) =
            merged.into_iter().partition(|f| f.default.is_none());
        let n_required = required.len();
        let mut fields = required;
        fields.extend(optional);

        debug!(
            struct_name = %self.name,
            n_fields = fields.len(),
            n_required,
            "registered struct type",
        );
        Ok(Arc::new(StructMeta {
            name: self.name,
            fields,
            n_required,
            config: self.config,
            post_init: self.post_init,
            field_types: OnceLock::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typedesc;

    #[test]
    fn test_required_before_optional() {
        let meta = StructMeta::builder("User")
            .field_default("email", typedesc!(option(str)), Value::Null)
            .field("name", typedesc!(str))
            .field("age", typedesc!(int))
            .build()
            .unwrap();
        let names: Vec<&str> =
            meta.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["name", "age", "email"]);
        assert_eq!(meta.n_required(), 2);
    }

    #[test]
    fn test_base_merge_and_override() {
        let base = StructMeta::builder("Base")
            .field("id", typedesc!(int))
            .field("tag", typedesc!(str))
            .build()
            .unwrap();
        let derived = StructMeta::builder("Derived")
            .base(&base)
            .field_default("tag", typedesc!(str), Value::Str("x".into()))
            .field("extra", typedesc!(bool))
            .build()
            .unwrap();
        let names: Vec<&str> =
            derived.fields().iter().map(|f| f.name.as_str()).collect();
        // tag picked up a default, so it sorts after the required fields
        assert_eq!(names, ["id", "extra", "tag"]);
        assert_eq!(derived.n_required(), 2);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = StructMeta::builder("Bad")
            .field("x", typedesc!(int))
            .field("x", typedesc!(str))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rolling_hint_lookup() {
        let meta = StructMeta::builder("P")
            .field("a", typedesc!(int))
            .field("b", typedesc!(int))
            .field("c", typedesc!(int))
            .build()
            .unwrap();
        let mut hint = 0;
        assert_eq!(meta.field_index_hint("a", &mut hint), Some(0));
        assert_eq!(meta.field_index_hint("b", &mut hint), Some(1));
        assert_eq!(meta.field_index_hint("c", &mut hint), Some(2));
        // hint wrapped; out-of-order lookups still resolve
        assert_eq!(meta.field_index_hint("b", &mut hint), Some(1));
        assert_eq!(meta.field_index_hint("a", &mut hint), Some(0));
        assert_eq!(meta.field_index_hint("missing", &mut hint), None);
    }

    #[test]
    fn test_field_types_built_lazily() {
        let leaf = StructMeta::builder("Leaf")
            .field("value", typedesc!(int))
            .build()
            .unwrap();
        let tree = StructMeta::builder("Tree")
            .field(
                "children",
                TypeDesc::List(Box::new(TypeDesc::Struct(leaf))),
            )
            .build()
            .unwrap();
        let types = tree.field_types().unwrap();
        assert_eq!(types.len(), 1);
        assert!(types[0].array_elem().unwrap().struct_ref().is_some());
    }
}
