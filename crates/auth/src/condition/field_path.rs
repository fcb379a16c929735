//! Logical field name -> physical storage path.
//!
//! Record documents keep system columns at the top level and user-defined
//! module fields under the `data` namespace.

use std::borrow::Cow;

/// Namespace holding dynamic module fields.
pub const DATA_NAMESPACE: &str = "data";

/// Map a logical field name (as written in a condition rule) to its storage path.
pub fn storage_path(field: &str) -> Cow<'_, str> {
    match field {
        "id" | "_id" => Cow::Borrowed("_id"),
        "tenant_id" | "created_by" | "updated_by" | "created_at" | "updated_at" => {
            Cow::Borrowed(field)
        }
        "owner" | "owner_id" => Cow::Borrowed("data.owner"),
        "assigned_to" | "assignee" => Cow::Borrowed("data.assigned_to"),
        _ if field.starts_with("data.") => Cow::Borrowed(field),
        _ => Cow::Owned(format!("{DATA_NAMESPACE}.{field}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_fields_stay_top_level() {
        assert_eq!(storage_path("created_by"), "created_by");
        assert_eq!(storage_path("tenant_id"), "tenant_id");
        assert_eq!(storage_path("id"), "_id");
    }

    #[test]
    fn crm_aliases_resolve_into_data() {
        assert_eq!(storage_path("owner"), "data.owner");
        assert_eq!(storage_path("assignee"), "data.assigned_to");
    }

    #[test]
    fn everything_else_is_namespaced_once() {
        assert_eq!(storage_path("stage"), "data.stage");
        assert_eq!(storage_path("data.stage"), "data.stage");
    }
}
