/// SQLite persistence layer for workflow definitions
///
/// Definitions are stored as JSON rows so the graph shape can evolve
/// without migrations, while id/name stay as indexed columns for listing.

use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-backed definition store.
#[derive(Debug, Clone)]
pub struct DefinitionStorage {
    pool: SqlitePool,
}

impl DefinitionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the definitions table. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_definitions_name
            ON workflow_definitions(name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new definition or replace an existing one atomically.
    pub async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM workflow_definitions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;
                Ok(Some(definition))
            }
            None => Ok(None),
        }
    }

    /// List id/name/timestamps for every stored definition, newest first.
    pub async fn list_definitions(&self) -> Result<Vec<DefinitionMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM workflow_definitions ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut definitions = Vec::new();
        for row in rows {
            definitions.push(DefinitionMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            });
        }

        Ok(definitions)
    }

    /// Load every definition keyed by id, used to seed the registry at
    /// startup and on hot reload.
    pub async fn load_all_definitions(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query("SELECT id, definition FROM workflow_definitions")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;
            definitions.insert(id, definition);
        }

        Ok(definitions)
    }

    pub async fn delete_definition(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Basic definition metadata for listing operations.
#[derive(Debug, serde::Serialize)]
pub struct DefinitionMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}
