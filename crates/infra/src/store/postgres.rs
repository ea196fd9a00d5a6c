//! PostgreSQL adapters for the store ports.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (foreign key violation) | `23503` | `Domain(Conflict)` |
//! | anything else | | `Storage` |
//!
//! ## Atomicity
//!
//! - `record_failed_login` is one `UPDATE … RETURNING` over a row locked with
//!   `FOR UPDATE`, so concurrent failures serialize on the user row.
//! - `mark_consumed` is a conditional `UPDATE … WHERE consumed = FALSE AND
//!   revoked = FALSE AND expiration_date > now`.
//! - `redeem` runs that update and the user change in one transaction; a
//!   missing owner rolls the consumption back.
//! - `insert_superseding` runs in a transaction holding an advisory lock on
//!   (username, scope), so two issuances for the same pair cannot interleave.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use warden_auth::{
    LockoutPolicy, LoginAttemptOutcome, LoginRegister, ResourcePermission, Role, StoredUser,
    TokenScope, User, UserToken,
};
use warden_core::{DomainError, UserId};

use super::{
    ConsumeOutcome, LoginRegisterRepository, PermissionRepository, Redemption, RoleRepository,
    StoreError, UserRepository, UserTokenRepository,
};

const USER_COLUMNS: &str = r#"
    SELECT
        u.id,
        u.username,
        u.email,
        u.display_name,
        u.password_hash,
        u.enabled,
        u.account_non_expired,
        u.account_non_locked,
        u.credentials_non_expired,
        u.login_attempts,
        u.created_at,
        COALESCE(
            array_agg(ur.role ORDER BY ur.role) FILTER (WHERE ur.role IS NOT NULL),
            '{}'
        ) AS roles
    FROM users u
    LEFT JOIN user_roles ur ON ur.user_id = u.id
"#;

/// PostgreSQL-backed implementation of every store port.
///
/// `Send + Sync`; the pool handles connection management.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("migration failed: {e}")))
    }

    async fn fetch_user(&self, filter: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("{USER_COLUMNS} WHERE {filter} = $1 GROUP BY u.id");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Storage(format!("column '{column}': {e}")))
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let attempts: i32 = get(row, "login_attempts")?;
    Ok(StoredUser {
        id: UserId::from_uuid(get(row, "id")?),
        username: get(row, "username")?,
        email: get(row, "email")?,
        display_name: get(row, "display_name")?,
        password_hash: get(row, "password_hash")?,
        enabled: get(row, "enabled")?,
        account_non_expired: get(row, "account_non_expired")?,
        account_non_locked: get(row, "account_non_locked")?,
        credentials_non_expired: get(row, "credentials_non_expired")?,
        login_attempts: u32::try_from(attempts).unwrap_or(0),
        roles: get(row, "roles")?,
        created_at: get(row, "created_at")?,
    }
    .into())
}

fn token_from_row(row: &PgRow) -> Result<UserToken, StoreError> {
    let scope: String = get(row, "scope")?;
    let scope = TokenScope::from_str(&scope)
        .map_err(|e| StoreError::Storage(format!("column 'scope': {e}")))?;
    Ok(UserToken::restore(
        get(row, "token")?,
        get(row, "username")?,
        scope,
        get(row, "creation_date")?,
        get(row, "expiration_date")?,
        get(row, "consumed")?,
        get(row, "revoked")?,
    ))
}

fn permission_from_row(row: &PgRow) -> Result<ResourcePermission, StoreError> {
    let resource: String = get(row, "resource")?;
    let action: String = get(row, "action")?;
    Ok(ResourcePermission::parse_parts(&resource, &action)?)
}

fn max_attempts(policy: &LockoutPolicy) -> i32 {
    i32::try_from(policy.max_attempts.get()).unwrap_or(i32::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl UserRepository for PostgresStore {
    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("u.username", username).await
    }

    #[instrument(skip(self), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("u.email", email).await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists_by_username", e))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists_by_email", e))
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("{USER_COLUMNS} GROUP BY u.id ORDER BY u.username");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self, user), fields(username = user.username()), err)]
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;

        let roles: Vec<String> = user.roles.iter().cloned().collect();
        let known: Vec<String> =
            sqlx::query_scalar("SELECT name FROM roles WHERE name = ANY($1)")
                .bind(&roles)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_user", e))?;
        if let Some(missing) = roles.iter().find(|r| !known.contains(r)) {
            return Err(DomainError::missing("role", missing.clone()).into());
        }

        sqlx::query(
            r#"
            INSERT INTO users (
                id,
                username,
                email,
                display_name,
                password_hash,
                enabled,
                account_non_expired,
                account_non_locked,
                credentials_non_expired,
                login_attempts,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(user.username())
        .bind(user.email())
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.enabled)
        .bind(user.account_non_expired)
        .bind(user.account_non_locked)
        .bind(user.credentials_non_expired)
        .bind(i32::try_from(user.login_attempts).unwrap_or(i32::MAX))
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        for role in &roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
                .bind(user.id.as_uuid())
                .bind(role)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_user", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, username: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET enabled = $2 WHERE username = $1")
            .bind(username)
            .bind(enabled)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_enabled", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, password_hash), err)]
    async fn set_password(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, credentials_non_expired = TRUE WHERE username = $1",
        )
        .bind(username)
        .bind(password_hash)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_password", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn unlock(&self, username: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET account_non_locked = TRUE, login_attempts = 0 WHERE username = $1",
        )
        .bind(username)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unlock", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn add_role(&self, username: &str, role: &str) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("add_role", e))?;

        let user_id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("add_role", e))?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let role_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE name = $1)")
                .bind(role)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("add_role", e))?;
        if !role_exists {
            return Err(DomainError::missing("role", role).into());
        }

        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(role)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("add_role", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("add_role", e))?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn remove_role(&self, username: &str, role: &str) -> Result<bool, StoreError> {
        let user_exists = self.exists_by_username(username).await?;
        if !user_exists {
            return Ok(false);
        }
        sqlx::query(
            r#"
            DELETE FROM user_roles ur
            USING users u
            WHERE ur.user_id = u.id AND u.username = $1 AND ur.role = $2
            "#,
        )
        .bind(username)
        .bind(role)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("remove_role", e))?;
        Ok(true)
    }

    async fn usernames_with_role(&self, role: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            r#"
            SELECT u.username
            FROM users u
            JOIN user_roles ur ON ur.user_id = u.id
            WHERE ur.role = $1
            ORDER BY u.username
            "#,
        )
        .bind(role)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("usernames_with_role", e))
    }

    #[instrument(skip(self), err)]
    async fn record_failed_login(
        &self,
        username: &str,
        policy: &LockoutPolicy,
    ) -> Result<Option<LoginAttemptOutcome>, StoreError> {
        let row = sqlx::query(
            r#"
            WITH prev AS (
                SELECT id, account_non_locked AS was_unlocked
                FROM users
                WHERE username = $1
                FOR UPDATE
            )
            UPDATE users AS u
            SET
                login_attempts = CASE
                    WHEN prev.was_unlocked THEN u.login_attempts + 1
                    ELSE u.login_attempts
                END,
                account_non_locked = CASE
                    WHEN prev.was_unlocked THEN u.login_attempts + 1 < $2
                    ELSE FALSE
                END
            FROM prev
            WHERE u.id = prev.id
            RETURNING u.login_attempts, u.account_non_locked, prev.was_unlocked
            "#,
        )
        .bind(username)
        .bind(max_attempts(policy))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_failed_login", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let attempts: i32 = get(&row, "login_attempts")?;
        let non_locked: bool = get(&row, "account_non_locked")?;
        let was_unlocked: bool = get(&row, "was_unlocked")?;

        Ok(Some(LoginAttemptOutcome {
            login_attempts: u32::try_from(attempts).unwrap_or(0),
            locked: !non_locked,
            newly_locked: was_unlocked && !non_locked,
        }))
    }

    #[instrument(skip(self), err)]
    async fn reset_login_attempts(&self, username: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET login_attempts = 0 WHERE username = $1")
            .bind(username)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reset_login_attempts", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

impl PostgresStore {
    async fn load_grants(&self, role: &mut Role) -> Result<(), StoreError> {
        let rows = sqlx::query(
            "SELECT resource, action, granted FROM role_permissions WHERE role = $1",
        )
        .bind(role.name())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_grants", e))?;

        for row in &rows {
            role.set_grant(permission_from_row(row)?, get(row, "granted")?);
        }
        Ok(())
    }
}

fn role_from_row(row: &PgRow) -> Result<Role, StoreError> {
    let name: String = get(row, "name")?;
    let description: Option<String> = get(row, "description")?;
    let mut role = Role::new(&name)?;
    role.description = description;
    Ok(role)
}

#[async_trait::async_trait]
impl RoleRepository for PostgresStore {
    #[instrument(skip(self), err)]
    async fn find(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT name, description FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut role = role_from_row(&row)?;
        self.load_grants(&mut role).await?;
        Ok(Some(role))
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT name, description FROM roles ORDER BY name")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut role = role_from_row(row)?;
            self.load_grants(&mut role).await?;
            roles.push(role);
        }
        Ok(roles)
    }

    #[instrument(skip(self, role), fields(role = role.name()), err)]
    async fn insert(&self, role: &Role) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;

        sqlx::query("INSERT INTO roles (name, description) VALUES ($1, $2)")
            .bind(role.name())
            .bind(role.description.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;

        for grant in role.grant_rows() {
            sqlx::query(
                "INSERT INTO role_permissions (role, resource, action, granted) VALUES ($1, $2, $3, $4)",
            )
            .bind(role.name())
            .bind(grant.permission.resource.as_str())
            .bind(grant.permission.action.as_str())
            .bind(grant.granted)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("insert_role", e))
    }

    #[instrument(skip(self), err)]
    async fn set_description(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE roles SET description = $2 WHERE name = $1")
            .bind(name)
            .bind(description)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_description", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        let held: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_roles WHERE role = $1)")
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if held {
            return Err(DomainError::conflict(format!("role '{name}' is still assigned")).into());
        }

        // A concurrent assignment still trips the user_roles foreign key.
        let result = sqlx::query("DELETE FROM roles WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("delete_role", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, permission), fields(permission = %permission), err)]
    async fn set_grant(
        &self,
        name: &str,
        permission: &ResourcePermission,
        granted: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role, resource, action, granted)
            SELECT name, $2, $3, $4 FROM roles WHERE name = $1
            ON CONFLICT (role, resource, action)
            DO UPDATE SET granted = EXCLUDED.granted
            "#,
        )
        .bind(name)
        .bind(permission.resource.as_str())
        .bind(permission.action.as_str())
        .bind(granted)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_grant", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions / login audit
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl PermissionRepository for PostgresStore {
    #[instrument(skip(self, permission), fields(permission = %permission), err)]
    async fn register(&self, permission: &ResourcePermission) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("register_permission", e))?;

        sqlx::query("INSERT INTO resources (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(permission.resource.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("register_permission", e))?;
        sqlx::query("INSERT INTO actions (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(permission.action.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("register_permission", e))?;
        let created = sqlx::query(
            "INSERT INTO resource_permissions (resource, action) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(permission.resource.as_str())
        .bind(permission.action.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("register_permission", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("register_permission", e))?;
        Ok(created.rows_affected() > 0)
    }

    async fn exists(&self, permission: &ResourcePermission) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM resource_permissions WHERE resource = $1 AND action = $2)",
        )
        .bind(permission.resource.as_str())
        .bind(permission.action.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission_exists", e))
    }

    async fn list(&self) -> Result<Vec<ResourcePermission>, StoreError> {
        let rows = sqlx::query(
            "SELECT resource, action FROM resource_permissions ORDER BY resource, action",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }
}

#[async_trait::async_trait]
impl LoginRegisterRepository for PostgresStore {
    #[instrument(skip(self, entry), fields(username = entry.username(), logged_in = entry.logged_in()), err)]
    async fn append(&self, entry: &LoginRegister) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO login_registers (id, username, logged_in, occurred_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.id())
        .bind(entry.username())
        .bind(entry.logged_in())
        .bind(entry.timestamp())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_login_register", e))?;
        Ok(())
    }

    async fn recent(&self, username: &str, limit: usize) -> Result<Vec<LoginRegister>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, logged_in, occurred_at
            FROM login_registers
            WHERE username = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(username)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_login_registers", e))?;

        rows.iter()
            .map(|row| {
                Ok(LoginRegister::restore(
                    get(row, "id")?,
                    get(row, "username")?,
                    get(row, "logged_in")?,
                    get(row, "occurred_at")?,
                ))
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-time tokens
// ─────────────────────────────────────────────────────────────────────────────

const TOKEN_COLUMNS: &str =
    "SELECT token, scope, username, creation_date, expiration_date, consumed, revoked FROM user_tokens";

#[async_trait::async_trait]
impl UserTokenRepository for PostgresStore {
    #[instrument(skip(self, token), err)]
    async fn find(&self, token: &str, scope: TokenScope) -> Result<Option<UserToken>, StoreError> {
        let sql = format!("{TOKEN_COLUMNS} WHERE token = $1 AND scope = $2");
        let row = sqlx::query(&sql)
            .bind(token)
            .bind(scope.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_token", e))?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn list_for(
        &self,
        username: &str,
        scope: TokenScope,
    ) -> Result<Vec<UserToken>, StoreError> {
        let sql = format!("{TOKEN_COLUMNS} WHERE username = $1 AND scope = $2 ORDER BY creation_date");
        let rows = sqlx::query(&sql)
            .bind(username)
            .bind(scope.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_tokens", e))?;
        rows.iter().map(token_from_row).collect()
    }

    #[instrument(skip(self, token), fields(username = token.username(), scope = %token.scope()), err)]
    async fn insert_superseding(
        &self,
        token: &UserToken,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_superseding", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
            .bind(token.username())
            .bind(token.scope().as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_superseding", e))?;

        let revoked = sqlx::query(
            r#"
            UPDATE user_tokens
            SET revoked = TRUE
            WHERE username = $1
              AND scope = $2
              AND consumed = FALSE
              AND revoked = FALSE
              AND expiration_date > $3
            "#,
        )
        .bind(token.username())
        .bind(token.scope().as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_superseding", e))?;

        sqlx::query(
            r#"
            INSERT INTO user_tokens (
                token,
                scope,
                username,
                creation_date,
                expiration_date,
                consumed,
                revoked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(token.token())
        .bind(token.scope().as_str())
        .bind(token.username())
        .bind(token.creation_date())
        .bind(token.expiration_date())
        .bind(token.is_consumed())
        .bind(token.is_revoked())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_superseding", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_superseding", e))?;
        Ok(revoked.rows_affected())
    }

    #[instrument(skip(self, token), err)]
    async fn mark_consumed(
        &self,
        token: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("mark_consumed", e))?;
        let outcome = consume_in(&mut tx, token, scope, now).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("mark_consumed", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self, token, redemption), err)]
    async fn redeem(
        &self,
        token: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
        redemption: &Redemption,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("redeem", e))?;

        let outcome = consume_in(&mut tx, token, scope, now).await?;
        let ConsumeOutcome::Consumed { username } = &outcome else {
            return Ok(outcome);
        };

        let updated = match redemption {
            Redemption::Activate => {
                sqlx::query("UPDATE users SET enabled = TRUE WHERE username = $1")
                    .bind(username)
                    .execute(&mut *tx)
                    .await
            }
            Redemption::ResetPassword { password_hash } => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET
                        password_hash = $2,
                        credentials_non_expired = TRUE,
                        account_non_locked = TRUE,
                        login_attempts = 0
                    WHERE username = $1
                    "#,
                )
                .bind(username)
                .bind(password_hash)
                .execute(&mut *tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("redeem", e))?;

        // Dropping the transaction rolls the consumption back.
        if updated.rows_affected() == 0 {
            return Err(DomainError::missing("user", username.clone()).into());
        }

        tx.commit().await.map_err(|e| map_sqlx_error("redeem", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self, token), err)]
    async fn revoke(&self, token: &str, scope: TokenScope) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE user_tokens SET revoked = TRUE WHERE token = $1 AND scope = $2")
                .bind(token)
                .bind(scope.as_str())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("revoke_token", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn purge_finished(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM user_tokens WHERE consumed OR revoked OR expiration_date <= $1",
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_finished", e))?;
        Ok(result.rows_affected())
    }
}

/// Conditional consumption inside `tx`; classifies the row when nothing matched.
async fn consume_in(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    token: &str,
    scope: TokenScope,
    now: DateTime<Utc>,
) -> Result<ConsumeOutcome, StoreError> {
    let username: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE user_tokens
        SET consumed = TRUE
        WHERE token = $1
          AND scope = $2
          AND consumed = FALSE
          AND revoked = FALSE
          AND expiration_date > $3
        RETURNING username
        "#,
    )
    .bind(token)
    .bind(scope.as_str())
    .bind(now)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("consume_token", e))?;

    if let Some(username) = username {
        return Ok(ConsumeOutcome::Consumed { username });
    }

    let sql = format!("{TOKEN_COLUMNS} WHERE token = $1 AND scope = $2");
    let row = sqlx::query(&sql)
        .bind(token)
        .bind(scope.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("consume_token", e))?;
    let found = row.as_ref().map(token_from_row).transpose()?;
    Ok(ConsumeOutcome::refused(found.as_ref(), now))
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => DomainError::conflict(msg).into(),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Storage(format!("timed out acquiring a connection in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_threshold_is_bound_as_int4() {
        let policy = LockoutPolicy::new(std::num::NonZeroU32::new(u32::MAX).unwrap());
        assert_eq!(max_attempts(&policy), i32::MAX);
        assert_eq!(max_attempts(&LockoutPolicy::default()), 5);
    }

    #[test]
    fn non_database_errors_map_to_storage() {
        let err = map_sqlx_error("find_token", sqlx::Error::PoolClosed);
        assert_eq!(
            err,
            StoreError::Storage("connection pool closed in find_token".into())
        );
    }
}
