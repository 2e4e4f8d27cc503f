//! Sealed credential persistence using SQLite.
//!
//! Stores [`StoredCredential`] records keyed by `(owner_id, provider)`. The
//! store only ever sees sealed material: encryption happens before a record
//! reaches it, so this layer is an opaque keyed collaborator as far as the
//! cipher is concerned.

use super::{EncryptedSecret, StoredCredential};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed store for sealed credentials.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id INTEGER PRIMARY KEY,
///     owner_id TEXT NOT NULL,
///     provider TEXT NOT NULL,
///     access_ciphertext TEXT NOT NULL,
///     access_iv TEXT NOT NULL,
///     access_tag TEXT NOT NULL,
///     refresh_ciphertext TEXT,
///     refresh_iv TEXT,
///     refresh_tag TEXT,
///     token_type TEXT NOT NULL,
///     scope TEXT NOT NULL,
///     issued_at TEXT NOT NULL,          -- ISO 8601
///     expires_at TEXT NOT NULL,         -- ISO 8601
///     updated_at TEXT NOT NULL,         -- ISO 8601
///     UNIQUE(owner_id, provider)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex for safe concurrent access
/// - SQLite itself is thread-safe with serialized mode
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a credential store at the given path. `:memory:`
    /// gives an ephemeral store for tests.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open credential database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                owner_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_ciphertext TEXT NOT NULL,
                access_iv TEXT NOT NULL,
                access_tag TEXT NOT NULL,
                refresh_ciphertext TEXT,
                refresh_iv TEXT,
                refresh_tag TEXT,
                token_type TEXT NOT NULL,
                scope TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(owner_id, provider)
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_owner_provider ON credentials(owner_id, provider)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stores a sealed credential for an owner and provider.
    ///
    /// Existing credentials for the same `(owner_id, provider)` pair are
    /// replaced (upsert).
    pub fn store(
        &self,
        owner_id: &str,
        provider: &str,
        credential: &StoredCredential,
    ) -> Result<()> {
        let (refresh_ciphertext, refresh_iv, refresh_tag) = match &credential.refresh_token {
            Some(secret) => (
                Some(secret.ciphertext.clone()),
                Some(secret.iv.clone()),
                Some(secret.tag.clone()),
            ),
            None => (None, None, None),
        };

        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO credentials (
                    owner_id, provider,
                    access_ciphertext, access_iv, access_tag,
                    refresh_ciphertext, refresh_iv, refresh_tag,
                    token_type, scope, issued_at, expires_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(owner_id, provider) DO UPDATE SET
                    access_ciphertext = excluded.access_ciphertext,
                    access_iv = excluded.access_iv,
                    access_tag = excluded.access_tag,
                    refresh_ciphertext = excluded.refresh_ciphertext,
                    refresh_iv = excluded.refresh_iv,
                    refresh_tag = excluded.refresh_tag,
                    token_type = excluded.token_type,
                    scope = excluded.scope,
                    issued_at = excluded.issued_at,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    owner_id,
                    provider,
                    credential.access_token.ciphertext,
                    credential.access_token.iv,
                    credential.access_token.tag,
                    refresh_ciphertext,
                    refresh_iv,
                    refresh_tag,
                    credential.token_type,
                    credential.scope,
                    credential.issued_at.to_rfc3339(),
                    credential.expires_at.to_rfc3339(),
                    now,
                ],
            )
            .context("Failed to store credential")?;

        Ok(())
    }

    /// Retrieves the sealed credential for an owner and provider, if any.
    pub fn get(&self, owner_id: &str, provider: &str) -> Result<Option<StoredCredential>> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                r#"
                SELECT access_ciphertext, access_iv, access_tag,
                       refresh_ciphertext, refresh_iv, refresh_tag,
                       token_type, scope, issued_at, expires_at
                FROM credentials
                WHERE owner_id = ?1 AND provider = ?2
                "#,
                params![owner_id, provider],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query credential")?;

        let Some((
            access_ciphertext,
            access_iv,
            access_tag,
            refresh_ciphertext,
            refresh_iv,
            refresh_tag,
            token_type,
            scope,
            issued_at,
            expires_at,
        )) = row
        else {
            return Ok(None);
        };

        let refresh_token = match (refresh_ciphertext, refresh_iv, refresh_tag) {
            (Some(ciphertext), Some(iv), Some(tag)) => {
                Some(EncryptedSecret { ciphertext, iv, tag })
            }
            _ => None,
        };

        Ok(Some(StoredCredential {
            access_token: EncryptedSecret {
                ciphertext: access_ciphertext,
                iv: access_iv,
                tag: access_tag,
            },
            refresh_token,
            token_type,
            scope,
            issued_at: parse_timestamp(&issued_at)?,
            expires_at: parse_timestamp(&expires_at)?,
        }))
    }

    /// Deletes the credential for an owner and provider.
    ///
    /// Returns `true` if a credential was removed.
    pub fn delete(&self, owner_id: &str, provider: &str) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM credentials WHERE owner_id = ?1 AND provider = ?2",
                params![owner_id, provider],
            )
            .context("Failed to delete credential")?;

        Ok(rows_affected > 0)
    }

    /// Lists providers with stored credentials for an owner.
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT provider FROM credentials WHERE owner_id = ?1 ORDER BY provider")
            .context("Failed to prepare query")?;

        let providers = stmt
            .query_map(params![owner_id], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(providers)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Failed to parse stored timestamp")?
        .with_timezone(&Utc))
}
