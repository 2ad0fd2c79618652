//! Mapping Store: persistence and lifecycle for mapping sets.
//!
//! Owns the single-active invariant: at most one mapping set has
//! `is_active = 1` at any time. The `activate` transition clears the previous
//! active set and marks the new one inside one transaction, and the schema
//! backs this up with a partial unique index, so readers can never observe
//! two active sets even transiently.
//!
//! State machine per set: Draft (created inactive) → Active (`activate`) →
//! Inactive (`deactivate`) → Deleted (only from Inactive).

use std::collections::{BTreeMap, BTreeSet};

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::HarmonizerError;
use crate::models::{FieldMapping, MappingSet};

/// Partial update for [`MappingStore::update`]. `None` fields are left
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct MappingSetUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub mappings: Option<Vec<FieldMapping>>,
}

#[derive(Clone)]
pub struct MappingStore {
    pool: SqlitePool,
}

impl MappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new mapping set in the Draft state.
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        mappings: Vec<FieldMapping>,
    ) -> Result<MappingSet, HarmonizerError> {
        validate_rules(&mappings)?;

        let collision: Option<String> =
            sqlx::query_scalar("SELECT id FROM mapping_sets WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if collision.is_some() {
            return Err(HarmonizerError::DuplicateName(name.to_string()));
        }

        let set = MappingSet {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            mappings,
            is_active: false,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO mapping_sets (id, name, description, mappings_json, is_active, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&set.id)
        .bind(&set.name)
        .bind(&set.description)
        .bind(serde_json::to_string(&set.mappings)?)
        .bind(set.created_at)
        .execute(&self.pool)
        .await?;

        Ok(set)
    }

    pub async fn get(&self, id: &str) -> Result<MappingSet, HarmonizerError> {
        let row = sqlx::query("SELECT * FROM mapping_sets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row_to_set(&row),
            None => Err(HarmonizerError::NotFound(id.to_string())),
        }
    }

    pub async fn list(&self) -> Result<Vec<MappingSet>, HarmonizerError> {
        let rows = sqlx::query("SELECT * FROM mapping_sets ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_set).collect()
    }

    /// The currently active set, if any.
    pub async fn active(&self) -> Result<Option<MappingSet>, HarmonizerError> {
        let row = sqlx::query("SELECT * FROM mapping_sets WHERE is_active = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_set).transpose()
    }

    /// Whether the given set is currently active. Used by the applier to
    /// re-check between batches.
    pub async fn is_active(&self, id: &str) -> Result<bool, HarmonizerError> {
        let active: Option<i64> =
            sqlx::query_scalar("SELECT is_active FROM mapping_sets WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(active.unwrap_or(0) != 0)
    }

    /// Apply a partial update. The stored set is left untouched when any
    /// validation fails.
    pub async fn update(
        &self,
        id: &str,
        changes: MappingSetUpdate,
    ) -> Result<MappingSet, HarmonizerError> {
        let mut set = self.get(id).await?;

        if let Some(mappings) = changes.mappings {
            validate_rules(&mappings)?;
            set.mappings = mappings;
        }
        if let Some(name) = changes.name {
            let collision: Option<String> =
                sqlx::query_scalar("SELECT id FROM mapping_sets WHERE name = ? AND id != ?")
                    .bind(&name)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            if collision.is_some() {
                return Err(HarmonizerError::DuplicateName(name));
            }
            set.name = name;
        }
        if let Some(description) = changes.description {
            set.description = Some(description);
        }

        sqlx::query(
            "UPDATE mapping_sets SET name = ?, description = ?, mappings_json = ? WHERE id = ?",
        )
        .bind(&set.name)
        .bind(&set.description)
        .bind(serde_json::to_string(&set.mappings)?)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(set)
    }

    /// Atomically make this set the single active one.
    ///
    /// Clearing the previous active set and marking the new one happen in
    /// one transaction; combined with the partial unique index, no reader
    /// ever sees two active sets. Activation does not rewrite documents —
    /// the applier does that as the second half of the logical unit.
    pub async fn activate(&self, id: &str) -> Result<(), HarmonizerError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM mapping_sets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(HarmonizerError::NotFound(id.to_string()));
        }

        sqlx::query("UPDATE mapping_sets SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE mapping_sets SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Return the set to the inactive state. Already-applied documents are
    /// not reverted.
    pub async fn deactivate(&self, id: &str) -> Result<(), HarmonizerError> {
        let result = sqlx::query("UPDATE mapping_sets SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HarmonizerError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete an inactive set. Active sets must be deactivated first.
    pub async fn delete(&self, id: &str) -> Result<(), HarmonizerError> {
        let set = self.get(id).await?;
        if set.is_active {
            return Err(HarmonizerError::ActiveMappingDelete(set.name));
        }
        sqlx::query("DELETE FROM mapping_sets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Reject rule lists where an original field appears twice or two distinct
/// originals rename to the same target.
fn validate_rules(mappings: &[FieldMapping]) -> Result<(), HarmonizerError> {
    let mut by_target: BTreeMap<&str, &str> = BTreeMap::new();
    let mut originals: BTreeSet<&str> = BTreeSet::new();

    for rule in mappings {
        let original = rule.original_field.as_str();
        let target = rule.target_field.as_str();

        if !originals.insert(original) {
            return Err(HarmonizerError::DuplicateOriginal(original.to_string()));
        }
        if let Some(first) = by_target.insert(target, original) {
            return Err(HarmonizerError::DuplicateTarget {
                first: first.to_string(),
                second: original.to_string(),
                target: target.to_string(),
            });
        }
    }
    Ok(())
}

fn row_to_set(row: &sqlx::sqlite::SqliteRow) -> Result<MappingSet, HarmonizerError> {
    let mappings_json: String = row.get("mappings_json");
    let is_active: i64 = row.get("is_active");
    Ok(MappingSet {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        mappings: serde_json::from_str(&mappings_json)?,
        is_active: is_active != 0,
        created_at: row.get("created_at"),
    })
}
