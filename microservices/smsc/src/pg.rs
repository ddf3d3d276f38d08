//! PostgreSQL-backed gateway store

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tarn_core::{MessageId, MessageStatus, OperatorStatus, Priority, QueueEntryStatus};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use crate::error::{Result, SmscError};
use crate::store::{GatewayStore, Message, Operator, QueueEntry, Route};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    message_id TEXT NOT NULL UNIQUE,
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    content TEXT NOT NULL,
    status TEXT NOT NULL,
    operator_id BIGINT NOT NULL,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_status_idx ON messages (status);
CREATE INDEX IF NOT EXISTS messages_operator_created_idx ON messages (operator_id, created_at);

CREATE TABLE IF NOT EXISTS operators (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    name TEXT NOT NULL,
    country_code TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INT NOT NULL,
    max_tps INT NOT NULL,
    connection_params JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS routes (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    prefix TEXT NOT NULL,
    operator_id BIGINT NOT NULL REFERENCES operators (id),
    priority INT NOT NULL,
    cost NUMERIC(10,4) NOT NULL
);
CREATE INDEX IF NOT EXISTS routes_prefix_idx ON routes (prefix);

CREATE TABLE IF NOT EXISTS message_queue (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    message_id TEXT NOT NULL UNIQUE,
    operator_id BIGINT NOT NULL,
    priority INT NOT NULL,
    scheduled_at TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    lease_expires_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS message_queue_claim_idx
    ON message_queue (status, scheduled_at, priority);
"#;

/// Gateway store on the PostgreSQL wire protocol
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create the pool and bootstrap the schema
    pub async fn connect(url: &str, max_size: usize) -> Result<Self> {
        info!(max_size, "Creating database pool");

        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| SmscError::Storage(format!("invalid database url: {}", e)))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| SmscError::Storage(e.to_string()))?;

        let store = Self { pool };
        store
            .client()
            .await?
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| SmscError::Storage(format!("schema bootstrap failed: {}", e)))?;

        debug!("Database pool ready");
        Ok(store)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))
    }
}

fn message_from_row(row: &Row) -> Result<Message> {
    let status: String = row.get("status");
    Ok(Message {
        message_id: MessageId(row.get("message_id")),
        sender: row.get("sender"),
        recipient: row.get("recipient"),
        content: row.get("content"),
        status: MessageStatus::parse(&status)
            .ok_or_else(|| SmscError::Storage(format!("bad message status {:?}", status)))?,
        operator_id: row.get("operator_id"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn operator_from_row(row: &Row) -> Result<Operator> {
    let status: String = row.get("status");
    let params: serde_json::Value = row.get("connection_params");
    Ok(Operator {
        id: row.get("id"),
        name: row.get("name"),
        country_code: row.get("country_code"),
        status: OperatorStatus::parse(&status)
            .ok_or_else(|| SmscError::Storage(format!("bad operator status {:?}", status)))?,
        priority: row.get("priority"),
        max_tps: row.get::<_, i32>("max_tps") as u32,
        connection: serde_json::from_value(params)
            .map_err(|e| SmscError::Storage(format!("bad connection params: {}", e)))?,
    })
}

fn entry_from_row(row: &Row) -> Result<QueueEntry> {
    let status: String = row.get("status");
    Ok(QueueEntry {
        message_id: MessageId(row.get("message_id")),
        operator_id: row.get("operator_id"),
        priority: Priority::new(row.get::<_, i32>("priority") as u8),
        scheduled_at: row.get("scheduled_at"),
        status: QueueEntryStatus::parse(&status)
            .ok_or_else(|| SmscError::Storage(format!("bad queue status {:?}", status)))?,
        lease_expires_at: row.get("lease_expires_at"),
    })
}

#[async_trait]
impl GatewayStore for PgStore {
    async fn create_message_with_queue(
        &self,
        message: &Message,
        entry: &QueueEntry,
    ) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        tx.execute(
            "INSERT INTO messages \
             (message_id, sender, recipient, content, status, operator_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &message.message_id.as_str(),
                &message.sender,
                &message.recipient,
                &message.content,
                &message.status.as_str(),
                &message.operator_id,
                &message.created_at,
                &message.updated_at,
            ],
        )
        .await
        .map_err(|e| SmscError::Transaction(e.to_string()))?;

        tx.execute(
            "INSERT INTO message_queue \
             (message_id, operator_id, priority, scheduled_at, status) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &entry.message_id.as_str(),
                &entry.operator_id,
                &(entry.priority.value() as i32),
                &entry.scheduled_at,
                &entry.status.as_str(),
            ],
        )
        .await
        .map_err(|e| SmscError::Transaction(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM messages WHERE message_id = $1", &[&id.as_str()])
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn transition_message(
        &self,
        id: &MessageId,
        from: &[MessageStatus],
        to: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE messages \
                 SET status = $1, error_message = COALESCE($2, error_message), updated_at = now() \
                 WHERE message_id = $3 AND status = ANY($4)",
                &[&to.as_str(), &error, &id.as_str(), &from],
            )
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        Ok(updated == 1)
    }

    async fn cancel_message(&self, id: &MessageId) -> Result<bool> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        let updated = tx
            .execute(
                "UPDATE messages SET status = 'cancelled', updated_at = now() \
                 WHERE message_id = $1 AND status IN ('pending', 'queued')",
                &[&id.as_str()],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        if updated == 1 {
            tx.execute(
                "DELETE FROM message_queue WHERE message_id = $1",
                &[&id.as_str()],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        Ok(updated == 1)
    }

    async fn claim_next_queued(
        &self,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> Result<Option<QueueEntry>> {
        let lease_until = now + lease;
        let client = self.client().await?;
        let row = client
            .query_opt(
                "WITH next AS ( \
                     SELECT id FROM message_queue \
                     WHERE status = 'pending' AND scheduled_at <= $1 \
                     ORDER BY priority DESC, scheduled_at ASC \
                     LIMIT 1 \
                     FOR UPDATE SKIP LOCKED \
                 ) \
                 UPDATE message_queue q \
                 SET status = 'in_flight', lease_expires_at = $2 \
                 FROM next WHERE q.id = next.id \
                 RETURNING q.message_id, q.operator_id, q.priority, q.scheduled_at, \
                           q.status, q.lease_expires_at",
                &[&now, &lease_until],
            )
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn resolve_delivery(
        &self,
        id: &MessageId,
        from: &[MessageStatus],
        to: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        let updated = tx
            .execute(
                "UPDATE messages \
                 SET status = $1, error_message = COALESCE($2, error_message), updated_at = now() \
                 WHERE message_id = $3 AND status = ANY($4)",
                &[&to.as_str(), &error, &id.as_str(), &from],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        if updated == 1 {
            tx.execute(
                "DELETE FROM message_queue WHERE message_id = $1",
                &[&id.as_str()],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        Ok(updated == 1)
    }

    async fn requeue_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        let rows = tx
            .query(
                "UPDATE message_queue \
                 SET status = 'pending', lease_expires_at = NULL \
                 WHERE status = 'in_flight' AND lease_expires_at < $1 \
                 RETURNING message_id",
                &[&now],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        let ids: Vec<String> = rows.iter().map(|r| r.get("message_id")).collect();
        if !ids.is_empty() {
            tx.execute(
                "UPDATE messages SET status = 'queued', updated_at = now() \
                 WHERE message_id = ANY($1) AND status = 'sending'",
                &[&ids],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        Ok(ids.len() as u64)
    }

    async fn operator(&self, id: i64) -> Result<Option<Operator>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM operators WHERE id = $1", &[&id])
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        row.as_ref().map(operator_from_row).transpose()
    }

    async fn upsert_operator(&self, operator: &Operator) -> Result<i64> {
        let params = serde_json::to_value(&operator.connection)
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        let client = self.client().await?;

        let row = if operator.id > 0 {
            client
                .query_one(
                    "UPDATE operators \
                     SET name = $2, country_code = $3, status = $4, priority = $5, \
                         max_tps = $6, connection_params = $7 \
                     WHERE id = $1 RETURNING id",
                    &[
                        &operator.id,
                        &operator.name,
                        &operator.country_code,
                        &operator.status.as_str(),
                        &operator.priority,
                        &(operator.max_tps as i32),
                        &params,
                    ],
                )
                .await
        } else {
            client
                .query_one(
                    "INSERT INTO operators \
                     (name, country_code, status, priority, max_tps, connection_params) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                    &[
                        &operator.name,
                        &operator.country_code,
                        &operator.status.as_str(),
                        &operator.priority,
                        &(operator.max_tps as i32),
                        &params,
                    ],
                )
                .await
        }
        .map_err(|e| SmscError::Storage(e.to_string()))?;

        Ok(row.get("id"))
    }

    async fn routes_for_prefix(&self, prefix: &str) -> Result<Vec<Route>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT prefix, operator_id, priority, cost FROM routes WHERE prefix = $1",
                &[&prefix],
            )
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| Route {
                prefix: row.get("prefix"),
                operator_id: row.get("operator_id"),
                priority: row.get("priority"),
                cost: row.get::<_, Decimal>("cost"),
            })
            .collect())
    }

    async fn route_prefixes(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT DISTINCT prefix FROM routes ORDER BY prefix", &[])
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get("prefix")).collect())
    }

    async fn replace_routes(&self, routes: &[Route]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        tx.execute("DELETE FROM routes", &[])
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;

        for route in routes {
            tx.execute(
                "INSERT INTO routes (prefix, operator_id, priority, cost) \
                 VALUES ($1, $2, $3, $4)",
                &[&route.prefix, &route.operator_id, &route.priority, &route.cost],
            )
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SmscError::Transaction(e.to_string()))
    }

    async fn recent_message_count(&self, operator_id: i64, since: DateTime<Utc>) -> Result<u32> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS n FROM messages \
                 WHERE operator_id = $1 AND created_at >= $2",
                &[&operator_id, &since],
            )
            .await
            .map_err(|e| SmscError::Storage(e.to_string()))?;
        Ok(row.get::<_, i64>("n") as u32)
    }

    async fn is_healthy(&self) -> bool {
        match self.pool.get().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }
}
