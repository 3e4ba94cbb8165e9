use anyhow::{Context as AnyhowContext, Result};
use rusqlite::params;
use uuid::Uuid;

use crate::db::connection::Database;
use crate::models::{Context, ContextType};

impl Database {
    /// Look up or lazily create the (type, name) entity. Creation races are
    /// resolved by the schema's UNIQUE constraint plus the re-select.
    pub async fn get_or_create_context(
        &self,
        context_type: ContextType,
        name: &str,
    ) -> Result<Context> {
        let name = name.trim().to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO contexts (id, context_type, name)
                 VALUES (?1, ?2, ?3)",
                params![Uuid::new_v4().to_string(), context_type.as_str(), name],
            )
            .with_context(|| "failed to insert context")?;

            let id: String = conn.query_row(
                "SELECT id FROM contexts WHERE context_type = ?1 AND name = ?2",
                params![context_type.as_str(), name],
                |row| row.get(0),
            )?;

            Ok(Context {
                id,
                context_type,
                name,
            })
        })
        .await
    }

    /// Link one context to a batch of observations in a single transaction.
    /// Re-linking an existing pair is a no-op.
    pub async fn link_context_to_observations(
        &self,
        context_id: &str,
        observation_ids: &[String],
    ) -> Result<()> {
        let context_id = context_id.to_string();
        let observation_ids = observation_ids.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for observation_id in &observation_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO observation_contexts (observation_id, context_id)
                     VALUES (?1, ?2)",
                    params![observation_id, context_id],
                )?;
            }
            tx.commit().with_context(|| "failed to commit context links")?;
            Ok(())
        })
        .await
    }

    /// Distinct contexts linked to any of the given observations.
    pub async fn get_contexts_for_observations(
        &self,
        observation_ids: &[String],
    ) -> Result<Vec<Context>> {
        if observation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let observation_ids = observation_ids.to_vec();
        self.execute(move |conn| {
            let placeholders = vec!["?"; observation_ids.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT c.id, c.context_type, c.name
                 FROM contexts c
                 JOIN observation_contexts oc ON oc.context_id = c.id
                 WHERE oc.observation_id IN ({placeholders})
                 ORDER BY c.context_type, c.name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(observation_ids.iter()))?;

            let mut contexts = Vec::new();
            while let Some(row) = rows.next()? {
                let context_type: String = row.get(1)?;
                contexts.push(Context {
                    id: row.get(0)?,
                    context_type: ContextType::parse(&context_type)?,
                    name: row.get(2)?,
                });
            }
            Ok(contexts)
        })
        .await
    }

    pub async fn count_context_links(&self, context_id: &str) -> Result<i64> {
        let context_id = context_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM observation_contexts WHERE context_id = ?1",
                params![context_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}
