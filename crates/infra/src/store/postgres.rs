//! Postgres-backed role/permission store.
//!
//! Grants and field rules are stored as JSONB; every query filters on
//! `tenant_id`. Role assignments live in `principal_roles` as an ordered
//! `UUID[]` per `(tenant, user)`.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | StoreError |
//! |------------|------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | PoolClosed / PoolTimedOut / Io | n/a | `Unavailable` |
//! | Decode / ColumnDecode | n/a | `Serialization` |
//! | Other | n/a | `Backend` |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use nexcrm_auth::permissions::{ActionPermission, FieldRules};
use nexcrm_auth::roles::RoleGrants;
use nexcrm_auth::{Permission, PermissionStore, PrincipalDirectory, ResourceRef, Role, StoreError};
use nexcrm_core::{PermissionId, RoleId, TenantId, UserId};

/// Schema for the tables this store reads and writes.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id                UUID PRIMARY KEY,
    tenant_id         UUID NOT NULL,
    name              TEXT NOT NULL,
    description       TEXT,
    is_system         BOOLEAN NOT NULL DEFAULT FALSE,
    permissions       JSONB NOT NULL DEFAULT '{}'::jsonb,
    field_permissions JSONB NOT NULL DEFAULT '{}'::jsonb,
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS permissions (
    id            UUID PRIMARY KEY,
    tenant_id     UUID NOT NULL,
    role_id       UUID NOT NULL REFERENCES roles (id) ON DELETE CASCADE,
    resource_type TEXT NOT NULL,
    resource_id   TEXT NOT NULL,
    actions       JSONB NOT NULL DEFAULT '{}'::jsonb,
    field_rules   JSONB NOT NULL DEFAULT '{}'::jsonb,
    UNIQUE (tenant_id, role_id, resource_type, resource_id)
);

CREATE INDEX IF NOT EXISTS permissions_by_resource
    ON permissions (tenant_id, resource_type, resource_id);

CREATE TABLE IF NOT EXISTS principal_roles (
    tenant_id UUID NOT NULL,
    user_id   UUID NOT NULL,
    role_ids  UUID[] NOT NULL DEFAULT '{}',
    PRIMARY KEY (tenant_id, user_id)
);
"#;

#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Replace the ordered role assignment of a principal.
    #[instrument(skip(self, role_ids), fields(tenant_id = %tenant_id, user_id = %user_id), err)]
    pub async fn assign_roles(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = role_ids.iter().map(|r| *r.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO principal_roles (tenant_id, user_id, role_ids)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, user_id) DO UPDATE SET role_ids = EXCLUDED.role_ids
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(&ids)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_roles", e))?;
        Ok(())
    }
}

const ROLE_COLUMNS: &str =
    "id, tenant_id, name, description, is_system, permissions, field_permissions";
const PERMISSION_COLUMNS: &str =
    "id, tenant_id, role_id, resource_type, resource_id, actions, field_rules";

fn role_from_row(row: &PgRow) -> Result<Role, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("role row: {e}"));
    let permissions: Json<RoleGrants> = row.try_get("permissions").map_err(decode)?;
    let field_permissions: Json<BTreeMap<String, FieldRules>> =
        row.try_get("field_permissions").map_err(decode)?;
    Ok(Role {
        id: RoleId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        is_system: row.try_get("is_system").map_err(decode)?,
        permissions: permissions.0,
        field_permissions: field_permissions.0,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("permission row: {e}"));
    let actions: Json<BTreeMap<String, ActionPermission>> =
        row.try_get("actions").map_err(decode)?;
    let field_rules: Json<FieldRules> = row.try_get("field_rules").map_err(decode)?;
    Ok(Permission {
        id: PermissionId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        role_id: RoleId::from_uuid(row.try_get("role_id").map_err(decode)?),
        resource: ResourceRef::new(
            row.try_get::<String, _>("resource_type").map_err(decode)?,
            row.try_get::<String, _>("resource_id").map_err(decode)?,
        ),
        actions: actions.0,
        field_rules: field_rules.0,
    })
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, role_id = %role_id), err)]
    async fn find_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(role_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn find_role_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 AND name = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 ORDER BY id"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self, role), fields(tenant_id = %role.tenant_id, role_id = %role.id), err)]
    async fn insert_role(&self, role: Role) -> Result<Role, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, tenant_id, name, description, is_system, permissions, field_permissions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.tenant_id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(Json(&role.permissions))
        .bind(Json(&role.field_permissions))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(role)
    }

    #[instrument(skip(self, role), fields(tenant_id = %role.tenant_id, role_id = %role.id), err)]
    async fn update_role(&self, role: Role) -> Result<Role, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $3, description = $4, is_system = $5, permissions = $6, field_permissions = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(role.tenant_id.as_uuid())
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(Json(&role.permissions))
        .bind(Json(&role.field_permissions))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("role {} not found", role.id)));
        }
        Ok(role)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, role_id = %role_id), err)]
    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> Result<bool, StoreError> {
        // permissions rows go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM roles WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, role_id = %role_id), err)]
    async fn list_permissions_by_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions \
             WHERE tenant_id = $1 AND role_id = $2 \
             ORDER BY resource_type, resource_id"
        ))
        .bind(tenant_id.as_uuid())
        .bind(role_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions_by_role", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_permissions_by_resource(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions \
             WHERE tenant_id = $1 AND resource_type = $2 AND resource_id = $3 \
             ORDER BY role_id"
        ))
        .bind(tenant_id.as_uuid())
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions_by_resource", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    /// The role must exist in the permission's tenant; the insert is guarded
    /// by a tenant-scoped `EXISTS` so a foreign role id never matches.
    #[instrument(
        skip(self, permission),
        fields(tenant_id = %permission.tenant_id, resource = %permission.resource),
        err
    )]
    async fn upsert_permission(&self, mut permission: Permission) -> Result<Permission, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO permissions (id, tenant_id, role_id, resource_type, resource_id, actions, field_rules)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE EXISTS (SELECT 1 FROM roles WHERE tenant_id = $2 AND id = $3)
            ON CONFLICT (tenant_id, role_id, resource_type, resource_id)
            DO UPDATE SET actions = EXCLUDED.actions, field_rules = EXCLUDED.field_rules
            RETURNING id
            "#,
        )
        .bind(permission.id.as_uuid())
        .bind(permission.tenant_id.as_uuid())
        .bind(permission.role_id.as_uuid())
        .bind(&permission.resource.kind)
        .bind(&permission.resource.id)
        .bind(Json(&permission.actions))
        .bind(Json(&permission.field_rules))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_permission", e))?;

        let Some(row) = row else {
            return Err(StoreError::TenantIsolation(format!(
                "role {} not found in tenant {}",
                permission.role_id, permission.tenant_id
            )));
        };
        let id: Uuid = row
            .try_get("id")
            .map_err(|e| StoreError::Serialization(format!("permission id: {e}")))?;
        permission.id = PermissionId::from_uuid(id);
        Ok(permission)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, role_id = %role_id, resource = %resource), err)]
    async fn delete_permission(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        resource: &ResourceRef,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM permissions
            WHERE tenant_id = $1 AND role_id = $2 AND resource_type = $3 AND resource_id = $4
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(role_id.as_uuid())
        .bind(&resource.kind)
        .bind(&resource.id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_permission", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PrincipalDirectory for PostgresPermissionStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, user_id = %user_id), err)]
    async fn role_ids(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<Vec<RoleId>>, StoreError> {
        let row = sqlx::query(
            "SELECT role_ids FROM principal_roles WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_ids", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let ids: Vec<Uuid> = row
            .try_get("role_ids")
            .map_err(|e| StoreError::Serialization(format!("role_ids: {e}")))?;
        Ok(Some(ids.into_iter().map(RoleId::from_uuid).collect()))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        e @ (sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. }) => {
            StoreError::Serialization(format!("decode error in {operation}: {e}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
