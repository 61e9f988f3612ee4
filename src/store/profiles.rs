//! Append-only profile history
//!
//! Each save appends a snapshot; the "current" profile is the newest row.
//! The version token is computed at save time and stored alongside the
//! content, so cache lookups and the staleness sweep read it directly.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::profile::{version_of, StyleProfile};
use crate::store::database::Database;
use crate::store::StoreError;

/// One stored profile revision.
#[derive(Debug, Clone)]
pub struct ProfileSnapshot {
    pub id: i64,
    pub profile: StyleProfile,
    pub version: String,
    pub created_at: String,
}

pub struct ProfileStore {
    db: Database,
}

impl ProfileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a new profile revision and return it with its version token.
    pub fn save(&self, profile: &StyleProfile) -> Result<ProfileSnapshot, StoreError> {
        let profile_json = serde_json::to_string(profile)?;
        let version = version_of(Some(profile));
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profile_history (profile_data, version, created_at)
                 VALUES (?1, ?2, ?3)",
                params![profile_json, version, now],
            )?;

            Ok(ProfileSnapshot {
                id: conn.last_insert_rowid(),
                profile: profile.clone(),
                version: version.clone(),
                created_at: now.clone(),
            })
        })
    }

    /// The newest saved profile, or none.
    pub fn current(&self) -> Result<Option<ProfileSnapshot>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, profile_data, version, created_at
                 FROM profile_history
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                row_to_snapshot,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// All saved revisions, newest first.
    pub fn history(&self) -> Result<Vec<ProfileSnapshot>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, profile_data, version, created_at
                 FROM profile_history
                 ORDER BY id DESC",
            )?;

            let rows = stmt.query_map([], row_to_snapshot)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

fn row_to_snapshot(row: &Row<'_>) -> Result<ProfileSnapshot, rusqlite::Error> {
    let profile_json: String = row.get(1)?;
    let profile: StyleProfile = serde_json::from_str(&profile_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ProfileSnapshot {
        id: row.get(0)?,
        profile,
        version: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(value: serde_json::Value) -> StyleProfile {
        StyleProfile::from_value(value).unwrap()
    }

    #[test]
    fn test_current_is_none_before_first_save() {
        let store = ProfileStore::new(Database::in_memory().unwrap());
        assert!(store.current().unwrap().is_none());
    }

    #[test]
    fn test_save_then_current_round_trips() {
        let store = ProfileStore::new(Database::in_memory().unwrap());
        let p = profile(json!({"body_type": "athletic"}));

        let saved = store.save(&p).unwrap();
        let current = store.current().unwrap().unwrap();

        assert_eq!(current.id, saved.id);
        assert_eq!(current.profile, p);
        assert_eq!(current.version, version_of(Some(&p)));
    }

    #[test]
    fn test_saves_append_and_current_is_newest() {
        let store = ProfileStore::new(Database::in_memory().unwrap());
        let first = profile(json!({"body_type": "athletic"}));
        let second = profile(json!({"body_type": "petite"}));

        store.save(&first).unwrap();
        store.save(&second).unwrap();

        assert_eq!(store.current().unwrap().unwrap().profile, second);
        assert_eq!(store.history().unwrap().len(), 2);
    }
}
