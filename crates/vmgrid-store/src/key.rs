//! Scoped object keys.

use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Address of a record: `(object_type, subtype, name)`.
///
/// Encoded as `type/subtype/name`, with an empty middle segment when there
/// is no subtype, so `get_all("network", None)` never sees records filed
/// under a subtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    object_type: String,
    subtype: Option<String>,
    name: String,
}

impl ObjectKey {
    pub fn new(object_type: &str, subtype: Option<&str>, name: impl fmt::Display) -> StoreResult<Self> {
        let name = name.to_string();
        check_component(object_type)?;
        if let Some(sub) = subtype {
            check_component(sub)?;
        }
        check_component(&name)?;
        Ok(Self {
            object_type: object_type.to_string(),
            subtype: subtype.map(str::to_string),
            name,
        })
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encode(&self) -> String {
        format!("{}{}", scope_prefix_unchecked(&self.object_type, self.subtype.as_deref()), self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Key prefix shared by every record of one `(type, subtype)` scope.
pub fn scope_prefix(object_type: &str, subtype: Option<&str>) -> StoreResult<String> {
    check_component(object_type)?;
    if let Some(sub) = subtype {
        check_component(sub)?;
    }
    Ok(scope_prefix_unchecked(object_type, subtype))
}

fn scope_prefix_unchecked(object_type: &str, subtype: Option<&str>) -> String {
    format!("{}/{}/", object_type, subtype.unwrap_or(""))
}

pub(crate) fn check_component(component: &str) -> StoreResult<()> {
    if component.is_empty() {
        return Err(StoreError::InvalidKey {
            component: component.to_string(),
            reason: "must not be empty",
        });
    }
    if component.contains('/') {
        return Err(StoreError::InvalidKey {
            component: component.to_string(),
            reason: "must not contain '/'",
        });
    }
    Ok(())
}
