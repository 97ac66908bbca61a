//! Metadata for user-declared enumerations: int-valued and string-valued
//! kinds, each with the lookup maps the decoders resolve wire values
//! through.

use crate::error::{ensure, Result};
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EnumKind {
    /// Members carry integer values; encodes as the value.
    Int,
    /// Members are bare names; encodes as the name.
    Str,
}

#[derive(Debug, Clone)]
pub struct EnumMember {
    pub name: String,
    /// Only meaningful for `EnumKind::Int`.
    pub value: i64,
}

pub struct EnumMeta {
    name: String,
    kind: EnumKind,
    members: Vec<EnumMember>,
    by_name: HashMap<String, usize>,
    by_value: HashMap<i64, usize>,
}

impl EnumMeta {
    /// Declare an int-valued enumeration.
    pub fn int(
        name: impl Into<String>,
        members: impl IntoIterator<Item = (impl Into<String>, i64)>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let mut out = EnumMeta {
            name,
            kind: EnumKind::Int,
            members: Vec::new(),
            by_name: HashMap::new(),
            by_value: HashMap::new(),
        };
        for (member_name, value) in members {
            let member_name = member_name.into();
            let index = out.members.len();
            ensure!(
                out.by_name.insert(member_name.clone(), index).is_none(),
                Schema,
                "duplicate member name {:?} in enum '{}'",
                member_name,
                out.name,
            );
            ensure!(
                out.by_value.insert(value, index).is_none(),
                Schema,
                "duplicate member value {} in enum '{}'",
                value,
                out.name,
            );
            out.members.push(EnumMember {
                name: member_name,
                value,
            });
        }
        ensure!(!out.members.is_empty(), Schema, "enum '{}' has no members", out.name);
        Ok(Arc::new(out))
    }

    /// Declare a string-valued enumeration.
    pub fn str(
        name: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let mut out = EnumMeta {
            name,
            kind: EnumKind::Str,
            members: Vec::new(),
            by_name: HashMap::new(),
            by_value: HashMap::new(),
        };
        for member_name in members {
            let member_name = member_name.into();
            let index = out.members.len();
            ensure!(
                out.by_name.insert(member_name.clone(), index).is_none(),
                Schema,
                "duplicate member name {:?} in enum '{}'",
                member_name,
                out.name,
            );
            out.members.push(EnumMember {
                name: member_name,
                value: index as i64,
            });
        }
        ensure!(!out.members.is_empty(), Schema, "enum '{}' has no members", out.name);
        Ok(Arc::new(out))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EnumKind {
        self.kind
    }

    pub fn members(&self) -> &[EnumMember] {
        &self.members
    }

    pub fn member(self: &Arc<Self>, index: usize) -> Option<EnumValue> {
        (index < self.members.len()).then(|| EnumValue {
            meta: self.clone(),
            index,
        })
    }

    pub fn member_by_value(self: &Arc<Self>, value: i64) -> Option<EnumValue> {
        self.by_value.get(&value).map(|&index| EnumValue {
            meta: self.clone(),
            index,
        })
    }

    pub fn member_by_name(self: &Arc<Self>, name: &str) -> Option<EnumValue> {
        self.by_name.get(name).map(|&index| EnumValue {
            meta: self.clone(),
            index,
        })
    }
}

impl Debug for EnumMeta {
    // the lookup maps are noise in debug output
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("EnumMeta")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("members", &self.members)
            .finish()
    }
}

/// Handle to one member of an [`EnumMeta`].
#[derive(Clone)]
pub struct EnumValue {
    meta: Arc<EnumMeta>,
    index: usize,
}

impl EnumValue {
    pub fn meta(&self) -> &Arc<EnumMeta> {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.members[self.index].name
    }

    pub fn int_value(&self) -> i64 {
        self.meta.members[self.index].value
    }

    pub fn kind(&self) -> EnumKind {
        self.meta.kind
    }
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.meta, &other.meta) && self.index == other.index
    }
}

impl Debug for EnumValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}::{}", self.meta.name, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_enum_lookup() {
        let color = EnumMeta::int("Color", [("RED", 1), ("GREEN", 2)]).unwrap();
        assert_eq!(color.member_by_value(2).unwrap().name(), "GREEN");
        assert!(color.member_by_value(3).is_none());
        assert_eq!(color.member_by_name("RED").unwrap().int_value(), 1);
    }

    #[test]
    fn test_str_enum_lookup() {
        let role = EnumMeta::str("Role", ["admin", "user"]).unwrap();
        assert_eq!(role.member_by_name("user").unwrap().name(), "user");
        assert!(role.member_by_name("root").is_none());
    }

    #[test]
    fn test_duplicate_members_rejected() {
        assert!(EnumMeta::int("E", [("A", 1), ("A", 2)]).is_err());
        assert!(EnumMeta::int("E", [("A", 1), ("B", 1)]).is_err());
        assert!(EnumMeta::str("E", ["a", "a"]).is_err());
    }
}
