use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::Session;
use super::tables::*;
use crate::auth::{hash_secret, IdentityStore, LookupError, RoleSet, UserId};

impl Database {
    // ========================================================================
    // Session operations
    // ========================================================================

    /// Store a session for `user_id`; only the hash of the secret is persisted
    pub fn create_session(
        &self,
        secret: &str,
        user_id: u64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        debug_assert!(user_id != 0, "sessions belong to a real user");

        let session = Session {
            user_id,
            created_at: Utc::now(),
            expires_at,
        };

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            let data = rmp_serde::to_vec_named(&session)?;
            table.insert(hash_secret(secret).as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Resolve a session secret to its user; expired sessions resolve to `None`
    pub fn get_session_user(&self, secret: &str) -> Result<Option<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;

        match table.get(hash_secret(secret).as_str())? {
            Some(data) => {
                let session: Session = rmp_serde::from_slice(data.value())?;
                if session.expires_at <= Utc::now() {
                    return Ok(None);
                }
                Ok(Some(session.user_id))
            }
            None => Ok(None),
        }
    }

    /// Remove every session belonging to a user, returning how many were removed
    pub fn delete_user_sessions(&self, user_id: u64) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;

        let keys: Vec<String> = {
            let table = write_txn.open_table(SESSIONS)?;
            let mut keys = Vec::new();
            for result in table.iter()? {
                let (key, value) = result?;
                let session: Session = rmp_serde::from_slice(value.value())?;
                if session.user_id == user_id {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        {
            let mut table = write_txn.open_table(SESSIONS)?;
            for key in &keys {
                table.remove(key.as_str())?;
            }
        }

        write_txn.commit()?;
        Ok(keys.len() as u64)
    }

    // ========================================================================
    // Role operations
    // ========================================================================

    /// Replace the role list of a user
    pub fn set_user_roles(&self, user_id: u64, roles: &[String]) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USER_ROLES)?;
            let data = rmp_serde::to_vec_named(roles)?;
            table.insert(user_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get the role list of a user (empty when none are assigned)
    pub fn get_user_roles(&self, user_id: u64) -> Result<Vec<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USER_ROLES)?;

        match table.get(user_id)? {
            Some(data) => Ok(rmp_serde::from_slice(data.value())?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl IdentityStore for Database {
    async fn resolve_identity(&self, credential: &str) -> Result<Option<UserId>, LookupError> {
        Ok(self
            .get_session_user(credential)?
            .map(UserId)
            .filter(|uid| !uid.is_anonymous()))
    }

    async fn role_set_of(&self, user: UserId) -> Result<RoleSet, LookupError> {
        Ok(RoleSet::from_iter(self.get_user_roles(user.0)?))
    }
}
