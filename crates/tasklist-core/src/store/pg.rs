use std::time::Duration;

use async_trait::async_trait;
use postgres::error::SqlState;
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::{debug, info, instrument, warn};

use super::{OrderBy, RemoteStore, StoreError, validate_table_name};
use crate::task::{NewTask, Task, TaskPatch};

type PgManager = PostgresConnectionManager<NoTls>;
type PgConnection = PooledConnection<PgManager>;

const COLUMNS: &str = "id, text, completed, order_index, created_at, updated_at";

/// Postgres-backed store. The driver is blocking, so every call runs on
/// tokio's blocking pool with its own pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<PgManager>,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

impl PgStore {
    #[instrument(skip(url))]
    pub fn connect(
        url: &str,
        pool_size: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut config: postgres::Config = url
            .parse()
            .map_err(|err: postgres::Error| StoreError::Connection(err.to_string()))?;
        config.connect_timeout(connect_timeout);

        let manager = PostgresConnectionManager::new(config, NoTls);
        // Lazy: a missing server surfaces on the first call, not at startup.
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .min_idle(Some(0))
            .connection_timeout(connect_timeout)
            .build_unchecked(manager);

        info!(pool_size, "configured postgres store");
        Ok(Self { pool })
    }

    /// Creates the table, the `updated_at` trigger and the order index.
    /// Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn provision(&self, table: &str) -> Result<(), StoreError> {
        validate_table_name(table)?;
        let sql = provision_sql(table);
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            conn.batch_execute(&sql)
                .map_err(|err| map_pg_error(&table, err))?;
            info!(table = %table, "provisioned task table");
            Ok(())
        })
        .await
    }

    async fn blocking<T, F>(&self, table: String, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        validate_table_name(&table)?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Connection(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Connection(format!("store worker failed: {err}")))?
    }
}

#[async_trait]
impl RemoteStore for PgStore {
    #[instrument(skip(self))]
    async fn list(&self, table: &str, order_by: OrderBy) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} ORDER BY {} ASC, id ASC",
            order_by.column()
        );
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            let rows = conn
                .query(sql.as_str(), &[])
                .map_err(|err| map_pg_error(&table, err))?;
            debug!(count = rows.len(), "listed tasks");
            rows.iter().map(|row| task_from_row(&table, row)).collect()
        })
        .await
    }

    #[instrument(skip(self, task), fields(order_index = task.order_index))]
    async fn insert(&self, table: &str, task: NewTask) -> Result<Task, StoreError> {
        let sql = format!(
            "INSERT INTO {table} (text, order_index) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            let row = conn
                .query_one(sql.as_str(), &[&task.text, &task.order_index])
                .map_err(|err| map_pg_error(&table, err))?;
            task_from_row(&table, &row)
        })
        .await
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, table: &str, id: i64, patch: TaskPatch) -> Result<(), StoreError> {
        let sql = update_sql(table);
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            let affected = conn
                .execute(
                    sql.as_str(),
                    &[&id, &patch.text, &patch.completed, &patch.order_index],
                )
                .map_err(|err| map_pg_error(&table, err))?;
            if affected == 0 {
                return Err(StoreError::NotFound { id });
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_many(
        &self,
        table: &str,
        updates: &[(i64, TaskPatch)],
    ) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let sql = update_sql(table);
        let updates = updates.to_vec();
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            let mut tx = conn
                .transaction()
                .map_err(|err| map_pg_error(&table, err))?;
            let stmt = tx
                .prepare(sql.as_str())
                .map_err(|err| map_pg_error(&table, err))?;

            for (id, patch) in &updates {
                let affected = tx
                    .execute(
                        &stmt,
                        &[id, &patch.text, &patch.completed, &patch.order_index],
                    )
                    .map_err(|err| map_pg_error(&table, err))?;
                if affected == 0 {
                    warn!(id, "row vanished mid-batch; rolling back");
                    return Err(StoreError::NotFound { id: *id });
                }
            }

            tx.commit().map_err(|err| map_pg_error(&table, err))?;
            debug!(count = updates.len(), "batched update committed");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_one(&self, table: &str, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            let affected = conn
                .execute(sql.as_str(), &[&id])
                .map_err(|err| map_pg_error(&table, err))?;
            if affected == 0 {
                return Err(StoreError::NotFound { id });
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, table: &str, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!("DELETE FROM {table} WHERE id = ANY($1)");
        let ids = ids.to_vec();
        let table = table.to_string();
        self.blocking(table.clone(), move |conn| {
            let affected = conn
                .execute(sql.as_str(), &[&ids])
                .map_err(|err| map_pg_error(&table, err))?;
            debug!(requested = ids.len(), affected, "bulk delete finished");
            Ok(())
        })
        .await
    }
}

fn update_sql(table: &str) -> String {
    format!(
        "UPDATE {table} SET \
         text = COALESCE($2, text), \
         completed = COALESCE($3, completed), \
         order_index = COALESCE($4, order_index) \
         WHERE id = $1"
    )
}

fn provision_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
            text TEXT NOT NULL CHECK (length(btrim(text)) > 0),
            completed BOOLEAN NOT NULL DEFAULT FALSE,
            order_index INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS {table}_order_index_idx ON {table} (order_index);
        CREATE OR REPLACE FUNCTION {table}_touch_updated_at() RETURNS TRIGGER AS $$
        BEGIN
            NEW.updated_at = now();
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql;
        DROP TRIGGER IF EXISTS {table}_touch_updated_at ON {table};
        CREATE TRIGGER {table}_touch_updated_at
            BEFORE UPDATE ON {table}
            FOR EACH ROW EXECUTE FUNCTION {table}_touch_updated_at();"
    )
}

fn task_from_row(table: &str, row: &Row) -> Result<Task, StoreError> {
    let decode = |err: postgres::Error| map_pg_error(table, err);
    Ok(Task {
        id: row.try_get("id").map_err(decode)?,
        text: row.try_get("text").map_err(decode)?,
        completed: row.try_get("completed").map_err(decode)?,
        order_index: row.try_get("order_index").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn map_pg_error(table: &str, err: postgres::Error) -> StoreError {
    if err.code() == Some(&SqlState::UNDEFINED_TABLE) {
        return StoreError::RelationMissing {
            table: table.to_string(),
        };
    }
    if err.is_closed() || (err.as_db_error().is_none() && err.code().is_none()) {
        return StoreError::Connection(err.to_string());
    }
    StoreError::Query(err.to_string())
}
