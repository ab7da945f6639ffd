use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use synergy_types::models::{Principal, PrincipalRole};

use crate::Database;
use crate::error::{Result, StoreError};
use crate::models::ts;

impl Database {
    /// Mirror a principal resolved from a credential. Name and role follow
    /// the identity provider; the `active` flag is owned locally and left
    /// untouched for existing rows.
    pub fn upsert_principal(&self, id: Uuid, display_name: &str, role: PrincipalRole) -> Result<Principal> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO principals (id, display_name, role, active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, role = excluded.role",
                params![id.to_string(), display_name, role.as_str(), ts(Utc::now())],
            )?;
            query_principal(conn, id)?.ok_or(StoreError::NotFound("principal"))
        })
    }

    pub fn set_principal_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE principals SET active = ?2 WHERE id = ?1",
                params![id.to_string(), active],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound("principal"));
            }
            Ok(())
        })
    }
}

pub(crate) fn query_principal(conn: &Connection, id: Uuid) -> Result<Option<Principal>> {
    let row = conn
        .query_row(
            "SELECT display_name, role, active FROM principals WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(display_name, role, active)| {
        let role = PrincipalRole::parse(&role).ok_or(StoreError::Corrupt {
            field: "principal.role",
            value: role.clone(),
        })?;
        Ok(Principal {
            id,
            display_name,
            role,
            active,
        })
    })
    .transpose()
}

/// Fails with `NotFound` unless the principal is mirrored and active.
pub(crate) fn require_active_principal(conn: &Connection, id: Uuid) -> Result<Principal> {
    match query_principal(conn, id)? {
        Some(p) if p.active => Ok(p),
        _ => Err(StoreError::NotFound("principal")),
    }
}
