use crate::accounting::{
    CapitalCheckpoint, CapitalPolicy, EventType, LedgerEvent, PortfolioAccountingState, RebalancePlan,
};
use crate::models::{OpenOrder, Side};
use crate::persistence::IdempotencyStore;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Row};
use std::collections::BTreeMap;
use std::time::Duration;

/// Postgres persistence for orders, idempotency keys, the ledger and capital checkpoints
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    /// Append a ledger event. Returns false when the event_id or reference_id already exists.
    pub async fn append_ledger_event(&self, event: &LedgerEvent) -> Result<bool> {
        insert_ledger_event(&self.pool, event).await
    }

    /// Load ledger events up to `as_of` (all when `None`), in replay order
    pub async fn load_ledger_events(&self, as_of: Option<DateTime<Utc>>) -> Result<Vec<LedgerEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, ts, event_type, symbol, side, qty, price, amount,
                   fee_currency, reference_id, metadata
            FROM ledger_events
            WHERE $1::timestamptz IS NULL OR ts <= $1
            ORDER BY ts ASC, event_id ASC
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    pub async fn count_ledger_events(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Upsert an order's last known state
    pub async fn save_order(&self, order: &OpenOrder, status: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                client_order_id, exchange_order_id, symbol, side, price, qty, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (client_order_id) DO UPDATE SET
                exchange_order_id = COALESCE(EXCLUDED.exchange_order_id, orders.exchange_order_id),
                qty = EXCLUDED.qty,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(&order.client_order_id)
        .bind(&order.exchange_order_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.price)
        .bind(order.qty)
        .bind(status)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved order {} for {} as {}",
            order.client_order_id,
            order.symbol,
            status
        );

        Ok(())
    }

    /// Orders stored with one of the open statuses
    pub async fn load_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT client_order_id, exchange_order_id, symbol, side, price, qty, created_at
            FROM orders
            WHERE symbol = $1 AND status IN ('NEW', 'PARTIALLY_FILLED')
            ORDER BY created_at ASC, client_order_id ASC
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let side: String = row.get("side");
            orders.push(OpenOrder {
                client_order_id: row.get("client_order_id"),
                exchange_order_id: row.get("exchange_order_id"),
                symbol: row.get("symbol"),
                side: side.parse::<Side>()?,
                price: row.get("price"),
                qty: row.get("qty"),
                created_at: row.get("created_at"),
            });
        }
        Ok(orders)
    }

    /// Persist a checkpoint. Rejects any event_count not above the latest stored one.
    pub async fn save_capital_checkpoint(&self, checkpoint: &CapitalCheckpoint) -> Result<()> {
        if let Some(latest) = self.load_latest_checkpoint().await? {
            if checkpoint.event_count <= latest.event_count {
                return Err(format!(
                    "checkpoint event_count {} does not advance past {}",
                    checkpoint.event_count, latest.event_count
                )
                .into());
            }
        }

        insert_checkpoint(&self.pool, checkpoint).await
    }

    pub async fn load_latest_checkpoint(&self) -> Result<Option<CapitalCheckpoint>> {
        latest_checkpoint(&self.pool).await
    }

    /// Sweep profit realized since the latest checkpoint into treasury.
    ///
    /// The REBALANCE event and the new checkpoint are written in one transaction with
    /// the checkpoint table locked, so concurrent or repeated replays sweep each profit once.
    /// `state` must be recomputed from every event in this store's ledger; a stale state
    /// is an error. Returns `None` when no ledger event landed since the latest checkpoint.
    pub async fn apply_rebalance(
        &self,
        policy: &CapitalPolicy,
        state: &PortfolioAccountingState,
        ts: DateTime<Utc>,
    ) -> Result<Option<RebalancePlan>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("LOCK TABLE capital_checkpoints IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_events")
            .fetch_one(&mut *tx)
            .await?;
        let count = count.max(0) as u64;
        if count != state.events_applied as u64 {
            return Err(format!(
                "ledger holds {} events but state was recomputed from {}; replay again",
                count, state.events_applied
            )
            .into());
        }
        let previous = latest_checkpoint(&mut *tx).await?;

        let Some(plan) = policy.rebalance_since(state, previous.as_ref(), count, ts)?
        else {
            return Ok(None);
        };

        if let Some(event) = &plan.event {
            insert_ledger_event(&mut *tx, event).await?;
        }
        insert_checkpoint(&mut *tx, &plan.checkpoint).await?;

        tx.commit().await?;
        Ok(Some(plan))
    }

    #[cfg(test)]
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query(
            "TRUNCATE orders, idempotency_keys, ledger_events, capital_checkpoints",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_ledger_event<'e, E: PgExecutor<'e>>(executor: E, event: &LedgerEvent) -> Result<bool> {
    let metadata = serde_json::to_string(&event.metadata)?;

    let result = sqlx::query(
        r#"
        INSERT INTO ledger_events (
            event_id, ts, event_type, symbol, side, qty, price, amount,
            fee_currency, reference_id, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&event.event_id)
    .bind(event.ts)
    .bind(event.event_type.as_str())
    .bind(&event.symbol)
    .bind(event.side.map(|s| s.as_str()))
    .bind(event.qty)
    .bind(event.price)
    .bind(event.amount)
    .bind(&event.fee_currency)
    .bind(&event.reference_id)
    .bind(metadata)
    .execute(executor)
    .await?;

    let inserted = result.rows_affected() == 1;
    if inserted {
        tracing::debug!("Appended ledger event {} ({})", event.event_id, event.event_type);
    } else {
        tracing::debug!("Ledger event {} already recorded", event.event_id);
    }

    Ok(inserted)
}

async fn insert_checkpoint<'e, E: PgExecutor<'e>>(executor: E, checkpoint: &CapitalCheckpoint) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO capital_checkpoints (event_count, realized_pnl_try, swept_to_treasury_try, ts)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(checkpoint.event_count as i64)
    .bind(checkpoint.realized_pnl_try)
    .bind(checkpoint.swept_to_treasury_try)
    .bind(checkpoint.ts)
    .execute(executor)
    .await?;

    tracing::info!(
        "Saved capital checkpoint at event {} (treasury swept {})",
        checkpoint.event_count,
        checkpoint.swept_to_treasury_try
    );

    Ok(())
}

async fn latest_checkpoint<'e, E: PgExecutor<'e>>(executor: E) -> Result<Option<CapitalCheckpoint>> {
    let row = sqlx::query(
        r#"
        SELECT event_count, realized_pnl_try, swept_to_treasury_try, ts
        FROM capital_checkpoints
        ORDER BY event_count DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|row| {
        let event_count: i64 = row.get("event_count");
        CapitalCheckpoint {
            event_count: event_count.max(0) as u64,
            realized_pnl_try: row.get("realized_pnl_try"),
            swept_to_treasury_try: row.get("swept_to_treasury_try"),
            ts: row.get("ts"),
        }
    }))
}

fn row_to_event(row: &PgRow) -> Result<LedgerEvent> {
    let event_type: String = row.get("event_type");
    let side: Option<String> = row.get("side");
    let metadata: String = row.get("metadata");
    let qty: Decimal = row.get("qty");

    Ok(LedgerEvent {
        event_id: row.get("event_id"),
        ts: row.get("ts"),
        event_type: event_type.parse::<EventType>()?,
        symbol: row.get("symbol"),
        side: side.map(|s| s.parse::<Side>()).transpose()?,
        qty,
        price: row.get("price"),
        amount: row.get("amount"),
        fee_currency: row.get("fee_currency"),
        reference_id: row.get("reference_id"),
        metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata)?,
    })
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl)?;

        // Take the key if absent or expired
        let row = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET
                expires_at = EXCLUDED.expires_at,
                created_at = NOW()
            WHERE idempotency_keys.expires_at <= NOW()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
