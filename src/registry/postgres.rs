//! PostgreSQL swap registry

use super::{StateCounts, SwapRegistry};
use crate::config::DatabaseConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::swap::{Swap, SwapId, SwapState, Transition};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

const SELECT_SWAP: &str = r#"
    SELECT id, deposit_address, required_amount, destination_recipient, state,
           observed_amount, confirmation_count, created_at, expires_at, updated_at,
           finalization_ref, failure_reason
    FROM swaps
"#;

/// Durable registry; compare-and-set is a conditional `UPDATE` on the prior state
pub struct PgSwapRegistry {
    pool: PgPool,
}

impl PgSwapRegistry {
    pub async fn connect(config: &DatabaseConfig) -> BridgeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the swaps table if it does not exist yet
    pub async fn ensure_schema(&self) -> BridgeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id UUID PRIMARY KEY,
                deposit_address TEXT NOT NULL UNIQUE,
                required_amount BIGINT NOT NULL,
                destination_recipient TEXT NOT NULL,
                state VARCHAR(20) NOT NULL,
                observed_amount BIGINT NOT NULL DEFAULT 0,
                confirmation_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                finalization_ref TEXT,
                failure_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_swaps_state ON swaps (state)")
            .execute(&self.pool)
            .await?;

        info!("Swap registry schema ready");
        Ok(())
    }

    async fn owner_of(&self, address: &str) -> BridgeResult<SwapId> {
        let row = sqlx::query("SELECT id FROM swaps WHERE deposit_address = $1")
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(SwapId::from(row.try_get::<Uuid, _>("id")?))
    }
}

#[async_trait]
impl SwapRegistry for PgSwapRegistry {
    async fn create(&self, swap: Swap) -> BridgeResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO swaps
                (id, deposit_address, required_amount, destination_recipient, state,
                 observed_amount, confirmation_count, created_at, expires_at, updated_at,
                 finalization_ref, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(swap.id.as_uuid())
        .bind(&swap.source_deposit_address)
        .bind(to_db_amount(swap.required_amount)?)
        .bind(&swap.destination_recipient)
        .bind(swap.state.as_str())
        .bind(to_db_amount(swap.observed_amount)?)
        .bind(to_db_amount(swap.confirmation_count)?)
        .bind(swap.created_at)
        .bind(swap.expires_at)
        .bind(swap.updated_at)
        .bind(&swap.finalization_ref)
        .bind(&swap.failure_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Stored swap {}", swap.id);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(BridgeError::DuplicateAddress {
                swap_id: self.owner_of(&swap.source_deposit_address).await?,
                address: swap.source_deposit_address,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &SwapId) -> BridgeResult<Swap> {
        let row = sqlx::query(&format!("{SELECT_SWAP} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_swap(&row),
            None => Err(BridgeError::SwapNotFound {
                swap_id: id.to_string(),
            }),
        }
    }

    async fn update_state(
        &self,
        id: &SwapId,
        expected: SwapState,
        transition: Transition,
    ) -> BridgeResult<Swap> {
        let mut updated = self.get(id).await?;
        updated.apply(expected, &transition, Utc::now())?;

        let result = sqlx::query(
            r#"
            UPDATE swaps
            SET state = $3,
                observed_amount = GREATEST(observed_amount, $4),
                confirmation_count = GREATEST(confirmation_count, $5),
                finalization_ref = $6,
                failure_reason = $7,
                updated_at = $8
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(updated.state.as_str())
        .bind(to_db_amount(updated.observed_amount)?)
        .bind(to_db_amount(updated.confirmation_count)?)
        .bind(&updated.finalization_ref)
        .bind(&updated.failure_reason)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual = self.get(id).await?.state;
            if actual == SwapState::Expired {
                return Err(BridgeError::ExpiredSwap { swap_id: *id });
            }
            return Err(BridgeError::StaleState {
                swap_id: *id,
                expected,
                actual,
            });
        }

        // Re-read so concurrent progress merged by GREATEST is reflected
        self.get(id).await
    }

    async fn list_non_terminal(&self) -> BridgeResult<Vec<SwapId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM swaps
            WHERE state NOT IN ('completed', 'failed', 'expired')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(SwapId::from(row.try_get::<Uuid, _>("id")?)))
            .collect()
    }

    async fn state_counts(&self) -> BridgeResult<StateCounts> {
        // One statement, one snapshot
        let rows = sqlx::query("SELECT state, COUNT(*) AS total FROM swaps GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StateCounts::new();
        for row in rows {
            let state: String = row.try_get("state")?;
            let total: i64 = row.try_get("total")?;
            counts.insert(state.parse()?, total as u64);
        }
        Ok(counts)
    }

    async fn health_check(&self) -> BridgeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

fn to_db_amount(value: u64) -> BridgeResult<i64> {
    i64::try_from(value)
        .map_err(|_| BridgeError::InvalidRequest(format!("Amount {} out of range", value)))
}

fn from_db_amount(value: i64) -> BridgeResult<u64> {
    u64::try_from(value)
        .map_err(|_| BridgeError::Internal(format!("Negative amount {} in registry", value)))
}

fn row_to_swap(row: &PgRow) -> BridgeResult<Swap> {
    let state: String = row.try_get("state")?;

    Ok(Swap {
        id: SwapId::from(row.try_get::<Uuid, _>("id")?),
        source_deposit_address: row.try_get("deposit_address")?,
        required_amount: from_db_amount(row.try_get("required_amount")?)?,
        destination_recipient: row.try_get("destination_recipient")?,
        state: state.parse()?,
        observed_amount: from_db_amount(row.try_get("observed_amount")?)?,
        confirmation_count: from_db_amount(row.try_get("confirmation_count")?)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        finalization_ref: row.try_get("finalization_ref")?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_bounds() {
        assert_eq!(to_db_amount(100_000).unwrap(), 100_000);
        assert!(to_db_amount(u64::MAX).is_err());
        assert!(from_db_amount(-1).is_err());
    }
}
