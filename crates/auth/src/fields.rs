//! Field-level visibility and editability.

use serde::Serialize;
use serde_json::Value;

use crate::condition::field_path::DATA_NAMESPACE;
use crate::error::AuthzError;
use crate::permissions::{FieldAccessLevel, FieldRules};
use crate::roles::Role;

/// Keep the higher access level per field; fields missing from `acc` adopt
/// the incoming level.
pub fn merge_field_rules(acc: &mut FieldRules, incoming: &FieldRules) {
    for (field, level) in incoming {
        acc.entry(field.clone())
            .and_modify(|current| *current = (*current).max(*level))
            .or_insert(*level);
    }
}

/// Merge the field rules every role declares for `module`.
///
/// Returns `None` (no field restriction at all) as soon as one role declares
/// nothing for the module, whatever the other roles restrict. An empty rule
/// map counts as declaring nothing.
pub fn resolve_field_permissions<'a, I>(roles: I, module: &str) -> Option<FieldPermissions>
where
    I: IntoIterator<Item = &'a Role>,
{
    let mut merged = FieldRules::new();
    let mut restricted = false;

    for role in roles {
        let Some(rules) = role.field_rules_for(module).filter(|rules| !rules.is_empty()) else {
            return None;
        };
        merge_field_rules(&mut merged, rules);
        restricted = true;
    }

    restricted.then(|| FieldPermissions {
        module: module.to_string(),
        rules: merged,
    })
}

/// Merged field restrictions for one module.
///
/// Fields without an entry are unrestricted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldPermissions {
    module: String,
    rules: FieldRules,
}

impl FieldPermissions {
    pub fn new(module: impl Into<String>, rules: FieldRules) -> Self {
        Self {
            module: module.into(),
            rules,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn rules(&self) -> &FieldRules {
        &self.rules
    }

    pub fn level(&self, field: &str) -> FieldAccessLevel {
        self.rules
            .get(field)
            .copied()
            .unwrap_or(FieldAccessLevel::ReadWrite)
    }

    /// Apply to a module schema: the fields the principal may see, in schema order.
    pub fn visible_fields<'a, I>(&self, schema_fields: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        schema_fields
            .into_iter()
            .filter(|field| self.level(field).is_visible())
            .map(str::to_string)
            .collect()
    }

    /// Remove hidden fields from a record's `data` object.
    pub fn redact(&self, record: &mut Value) {
        let Some(data) = record
            .get_mut(DATA_NAMESPACE)
            .and_then(Value::as_object_mut)
        else {
            return;
        };
        data.retain(|field, _| self.level(field).is_visible());
    }

    /// Reject a write touching any field that is not `read_write`.
    pub fn check_writable<'a, I>(&self, fields: I) -> Result<(), AuthzError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let blocked: Vec<&str> = fields
            .into_iter()
            .filter(|field| !self.level(field).is_writable())
            .collect();

        if blocked.is_empty() {
            Ok(())
        } else {
            Err(AuthzError::forbidden(format!(
                "fields not writable in '{}': {}",
                self.module,
                blocked.join(", ")
            )))
        }
    }
}
