use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use common::{DecisionRecord, DecisionState, Error, Result};
use selector::ArmSnapshot;

use crate::contract::DecisionContract;

/// SQLite record of every contract and periodic arm statistics.
#[derive(Clone)]
pub struct DecisionJournal {
    db: SqlitePool,
}

impl DecisionJournal {
    /// Open (creating if needed) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty copy.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let journal = Self::new(db);
        journal.migrate().await?;
        info!(url, "Decision journal ready");
        Ok(journal)
    }

    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.db)
            .await
            .map_err(|e| Error::Config(format!("database migration failed: {e}")))
    }

    /// Insert a contract, or overwrite the stored one as the decision moves
    /// through its lifecycle.
    pub async fn record(&self, contract: &DecisionContract) -> Result<()> {
        self.upsert(contract, None).await
    }

    /// Journal a decision together with the full record, so a paper trade
    /// still open at shutdown can be reloaded by [`open`](Self::open).
    pub async fn record_decision(&self, record: &DecisionRecord) -> Result<()> {
        let contract = DecisionContract::from_record(record);
        let record_json = serde_json::to_string(record)?;
        self.upsert(&contract, Some(record_json)).await
    }

    /// Decisions whose paper trade has not settled yet, oldest first.
    pub async fn open(&self) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record_json FROM decisions
            WHERE state IN (?, ?) AND record_json IS NOT NULL
            ORDER BY decided_at ASC
            "#,
        )
        .bind(DecisionState::Validated)
        .bind(DecisionState::Executing)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|row| -> Result<DecisionRecord> {
                let json: String = row.try_get("record_json")?;
                Ok(serde_json::from_str(&json)?)
            })
            .collect()
    }

    async fn upsert(&self, contract: &DecisionContract, record_json: Option<String>) -> Result<()> {
        let meta = &contract.metadata;
        let contract_json = serde_json::to_string(contract)?;
        let outcome_json = contract
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO decisions
                (decision_id, ticker, decided_at, verdict, state, direction, arm_id,
                 pattern, policy_ok, contract_json, outcome_json, record_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (decision_id) DO UPDATE SET
                verdict       = excluded.verdict,
                state         = excluded.state,
                policy_ok     = excluded.policy_ok,
                contract_json = excluded.contract_json,
                outcome_json  = excluded.outcome_json,
                record_json   = COALESCE(excluded.record_json, decisions.record_json),
                updated_at    = excluded.updated_at
            "#,
        )
        .bind(meta.decision_id.to_string())
        .bind(&contract.ticker)
        .bind(meta.timestamp.to_rfc3339())
        .bind(contract.verdict)
        .bind(meta.state)
        .bind(contract.plan.direction)
        .bind(&meta.arm)
        .bind(meta.pattern.to_string())
        .bind(contract.plan.policy_ok)
        .bind(contract_json)
        .bind(outcome_json)
        .bind(record_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        debug!(
            decision_id = %meta.decision_id,
            verdict = %contract.verdict,
            state = %meta.state,
            "Contract journaled"
        );
        Ok(())
    }

    pub async fn load(&self, decision_id: Uuid) -> Result<Option<DecisionContract>> {
        let row = sqlx::query("SELECT contract_json FROM decisions WHERE decision_id = ?")
            .bind(decision_id.to_string())
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("contract_json")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Newest contracts first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DecisionContract>> {
        let rows = sqlx::query(
            "SELECT contract_json FROM decisions ORDER BY decided_at DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|row| -> Result<DecisionContract> {
                let json: String = row.try_get("contract_json")?;
                Ok(serde_json::from_str(&json)?)
            })
            .collect()
    }

    pub async fn snapshot_arms(&self, arms: &[ArmSnapshot]) -> Result<()> {
        let taken_at = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;
        for arm in arms {
            sqlx::query(
                r#"
                INSERT INTO arm_snapshots
                    (taken_at, arm_id, pulls, updates, reward_sum, mean_reward, theta_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&taken_at)
            .bind(&arm.arm_id)
            .bind(arm.pulls as i64)
            .bind(arm.updates as i64)
            .bind(arm.reward_sum)
            .bind(arm.mean_reward)
            .bind(serde_json::to_string(&arm.theta)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(arms = arms.len(), "Arm statistics journaled");
        Ok(())
    }

    /// Rows in `arm_snapshots` for one arm.
    pub async fn arm_snapshot_count(&self, arm_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM arm_snapshots WHERE arm_id = ?")
            .bind(arm_id)
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get("n")?)
    }
}
