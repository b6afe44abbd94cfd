//! PostgreSQL-backed repository.
//!
//! One client behind an async mutex, (re)connected lazily when absent or
//! closed. Every statement runs inside a transaction that commits on
//! success and is rolled back explicitly on error.

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Repository;
use crate::error::MetricsError;
use crate::model::MetricKind;
use crate::retry::{RetrySchedule, retry};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gauge_metrics (
    id    serial PRIMARY KEY,
    name  varchar NOT NULL UNIQUE,
    gauge double precision NOT NULL
);
CREATE TABLE IF NOT EXISTS counter_metrics (
    id      serial PRIMARY KEY,
    name    varchar NOT NULL UNIQUE,
    counter bigint NOT NULL
);
";

const SELECT_GAUGE: &str = "SELECT gauge FROM gauge_metrics WHERE name = $1";
const SELECT_COUNTER: &str = "SELECT counter FROM counter_metrics WHERE name = $1";
const SELECT_GAUGES: &str = "SELECT name, gauge FROM gauge_metrics ORDER BY name";
const SELECT_COUNTERS: &str = "SELECT name, counter FROM counter_metrics ORDER BY name";
const GAUGE_EXISTS: &str = "SELECT 1 FROM gauge_metrics WHERE name = $1";
const COUNTER_EXISTS: &str = "SELECT 1 FROM counter_metrics WHERE name = $1";

const UPSERT_GAUGE: &str = "
INSERT INTO gauge_metrics (name, gauge) VALUES ($1, $2)
ON CONFLICT (name) DO UPDATE SET gauge = excluded.gauge
RETURNING gauge";

// Saturates at i64::MAX instead of raising numeric_value_out_of_range.
const UPSERT_COUNTER: &str = "
INSERT INTO counter_metrics (name, counter) VALUES ($1, $2)
ON CONFLICT (name) DO UPDATE
SET counter = LEAST(counter_metrics.counter::numeric + excluded.counter, 9223372036854775807)::bigint
RETURNING counter";

pub struct PostgresRepository {
    dsn: String,
    client: Mutex<Option<Client>>,
}

impl PostgresRepository {
    /// Creates a repository without connecting. The first call connects.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            client: Mutex::new(None),
        }
    }

    /// Connects and bootstraps the schema, retrying per `schedule`.
    pub async fn connect(
        dsn: impl Into<String>,
        schedule: &RetrySchedule,
        cancel: &CancellationToken,
    ) -> Result<Self, MetricsError> {
        let repo = Self::new(dsn);
        retry(schedule, cancel, || repo.bootstrap()).await?;
        info!("postgres schema ready");
        Ok(repo)
    }

    /// Creates both tables if missing.
    ///
    /// Concurrent bootstraps race on the catalog; the loser's duplicate
    /// object error means the tables exist.
    pub async fn bootstrap(&self) -> Result<(), MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?
            .transaction()
            .await
            .map_err(classify)?;
        match tx.batch_execute(SCHEMA).await {
            Ok(()) => tx.commit().await.map_err(classify),
            Err(e) if e.code().is_some_and(is_bootstrap_race) => {
                rollback(tx).await;
                debug!(error = %e, "schema created concurrently");
                Ok(())
            }
            Err(e) => {
                rollback(tx).await;
                Err(classify(e))
            }
        }
    }

    async fn connection(&self) -> Result<MutexGuard<'_, Option<Client>>, MetricsError> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().is_none_or(Client::is_closed) {
            let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls)
                .await
                .map_err(classify)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "postgres connection closed");
                }
            });
            debug!("postgres connected");
            *guard = Some(client);
        }
        Ok(guard)
    }
}

fn connected<'a>(
    guard: &'a mut MutexGuard<'_, Option<Client>>,
) -> Result<&'a mut Client, MetricsError> {
    guard
        .as_mut()
        .ok_or_else(|| MetricsError::Backend("postgres client not connected".into()))
}

async fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback().await {
        debug!(error = %e, "rollback failed");
    }
}

/// Commits on success, rolls back and classifies on failure.
async fn finish<T>(
    tx: Transaction<'_>,
    result: Result<T, tokio_postgres::Error>,
) -> Result<T, MetricsError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(classify)?;
            Ok(value)
        }
        Err(e) => {
            rollback(tx).await;
            Err(classify(e))
        }
    }
}

/// SQLSTATE classes worth another attempt: connection exceptions (08),
/// transaction rollbacks such as deadlocks (40), insufficient resources
/// (53), operator intervention (57), and a transaction already aborted by
/// an earlier statement.
pub(crate) fn is_transient(code: &SqlState) -> bool {
    *code == SqlState::IN_FAILED_SQL_TRANSACTION
        || ["08", "40", "53", "57"]
            .iter()
            .any(|class| code.code().starts_with(class))
}

/// Errors a concurrent `CREATE TABLE IF NOT EXISTS` raises in the session
/// that loses the race.
pub(crate) fn is_bootstrap_race(code: &SqlState) -> bool {
    *code == SqlState::DUPLICATE_TABLE || *code == SqlState::UNIQUE_VIOLATION
}

/// Maps a driver error onto the retry taxonomy.
fn classify(e: tokio_postgres::Error) -> MetricsError {
    match e.as_db_error() {
        Some(db) => {
            let msg = format!("{}: {}", db.severity(), db.message());
            if is_transient(db.code()) {
                MetricsError::Backend(msg)
            } else {
                MetricsError::BackendPermanent(msg)
            }
        }
        // Connection refused, closed socket, I/O.
        None => MetricsError::Backend(e.to_string()),
    }
}

fn not_found(kind: MetricKind, name: &str) -> MetricsError {
    MetricsError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn mismatch(name: &str, existing: MetricKind) -> MetricsError {
    MetricsError::KindMismatch {
        name: name.to_string(),
        existing,
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn gauge(&self, name: &str) -> Result<f64, MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?.transaction().await.map_err(classify)?;
        let result: Result<Option<f64>, tokio_postgres::Error> = async {
            match tx.query_opt(SELECT_GAUGE, &[&name]).await? {
                Some(row) => row.try_get::<_, f64>(0).map(Some),
                None => Ok(None),
            }
        }
        .await;
        finish(tx, result)
            .await?
            .ok_or_else(|| not_found(MetricKind::Gauge, name))
    }

    async fn counter(&self, name: &str) -> Result<i64, MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?.transaction().await.map_err(classify)?;
        let result: Result<Option<i64>, tokio_postgres::Error> = async {
            match tx.query_opt(SELECT_COUNTER, &[&name]).await? {
                Some(row) => row.try_get::<_, i64>(0).map(Some),
                None => Ok(None),
            }
        }
        .await;
        finish(tx, result)
            .await?
            .ok_or_else(|| not_found(MetricKind::Counter, name))
    }

    async fn set_gauge(&self, name: &str, value: f64) -> Result<f64, MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?.transaction().await.map_err(classify)?;
        let result: Result<Option<f64>, tokio_postgres::Error> = async {
            if tx.query_opt(COUNTER_EXISTS, &[&name]).await?.is_some() {
                return Ok(None);
            }
            let row = tx.query_one(UPSERT_GAUGE, &[&name, &value]).await?;
            row.try_get::<_, f64>(0).map(Some)
        }
        .await;
        finish(tx, result)
            .await?
            .ok_or_else(|| mismatch(name, MetricKind::Counter))
    }

    async fn add_counter(&self, name: &str, delta: i64) -> Result<i64, MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?.transaction().await.map_err(classify)?;
        let result: Result<Option<i64>, tokio_postgres::Error> = async {
            if tx.query_opt(GAUGE_EXISTS, &[&name]).await?.is_some() {
                return Ok(None);
            }
            let row = tx.query_one(UPSERT_COUNTER, &[&name, &delta]).await?;
            row.try_get::<_, i64>(0).map(Some)
        }
        .await;
        finish(tx, result)
            .await?
            .ok_or_else(|| mismatch(name, MetricKind::Gauge))
    }

    async fn gauges(&self) -> Result<Vec<(String, f64)>, MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?.transaction().await.map_err(classify)?;
        let result: Result<Vec<(String, f64)>, tokio_postgres::Error> = async {
            tx.query(SELECT_GAUGES, &[])
                .await?
                .iter()
                .map(|row| Ok((row.try_get::<_, String>(0)?, row.try_get::<_, f64>(1)?)))
                .collect()
        }
        .await;
        finish(tx, result).await
    }

    async fn counters(&self) -> Result<Vec<(String, i64)>, MetricsError> {
        let mut guard = self.connection().await?;
        let tx = connected(&mut guard)?.transaction().await.map_err(classify)?;
        let result: Result<Vec<(String, i64)>, tokio_postgres::Error> = async {
            tx.query(SELECT_COUNTERS, &[])
                .await?
                .iter()
                .map(|row| Ok((row.try_get::<_, String>(0)?, row.try_get::<_, i64>(1)?)))
                .collect()
        }
        .await;
        finish(tx, result).await
    }

    async fn ping(&self) -> Result<(), MetricsError> {
        let mut guard = self.connection().await?;
        connected(&mut guard)?
            .batch_execute("SELECT 1")
            .await
            .map_err(classify)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
