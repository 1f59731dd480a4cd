//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `RecordStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! The pool is created once at startup (with bounded retries) and shared by every
//! session. When an operation fails at the network level, a background task
//! checks the current pool with `SELECT 1` and rebuilds it only if that check
//! fails too. The failing request returns its error right away, and at most one
//! recovery task runs at a time. A saturated pool (`PoolTimedOut`) is reported
//! as unavailable but never triggers a rebuild.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mri_core::domain::{ClassLabel, PatientDetails, ScanRecord, UserCredentials};
use mri_core::ports::RecordStore;
use mri_core::{StoreError, StoreResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapters::retry::{retry_with_backoff, RetryPolicy};

//=========================================================================================
// Connection Settings
//=========================================================================================

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub url: String,
    pub max_connections: u32,
    pub retry: RetryPolicy,
}

impl StoreSettings {
    fn connect_timeout(&self) -> Duration {
        self.retry.attempt_timeout
    }
}

/// Opens a pool and proves it live with a handshake query, retrying per policy.
async fn open_pool(settings: &StoreSettings) -> StoreResult<PgPool> {
    retry_with_backoff(&settings.retry, "Database connection", move || async move {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.connect_timeout())
            .connect(&settings.url)
            .await
            .map_err(classify_error)?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(classify_error)?;
        Ok(pool)
    })
    .await
}

/// Splits `sqlx` failures into "connection is down" and everything else.
fn classify_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Operation(e.to_string()),
    }
}

/// Whether a failure suggests the pool's connections may be dead. Timeouts
/// waiting for a free connection only mean the pool is busy.
fn needs_reconnect(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed
    )
}

/// Runs `SELECT 1` on `pool`, giving up after `limit`.
async fn is_alive(pool: &PgPool, limit: Duration) -> bool {
    matches!(
        timeout(limit, sqlx::query("SELECT 1").execute(pool)).await,
        Ok(Ok(_))
    )
}

/// Replaces the shared pool if the current one fails a liveness check. The
/// stale pool is dropped, not closed; requests still holding it finish on it.
async fn recover(settings: &StoreSettings, pool: &RwLock<PgPool>) {
    let current = pool.read().await.clone();
    if is_alive(&current, settings.connect_timeout()).await {
        debug!("Database pool is healthy; keeping it.");
        return;
    }
    match open_pool(settings).await {
        Ok(fresh) => {
            *pool.write().await = fresh;
            info!("Database connection re-established.");
        }
        Err(e) => warn!(error = %e, "Database reconnect failed"),
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `RecordStore` port.
pub struct PgRecordStore {
    settings: StoreSettings,
    pool: Arc<RwLock<PgPool>>,
    reconnecting: Arc<Mutex<()>>,
}

impl PgRecordStore {
    /// Connects with bounded retries. Fails with `StoreError::Unavailable` once
    /// the policy is exhausted.
    pub async fn connect(settings: StoreSettings) -> StoreResult<Self> {
        let pool = open_pool(&settings).await?;
        info!("Database connection established.");
        Ok(Self::with_pool(settings, pool))
    }

    fn with_pool(settings: StoreSettings, pool: PgPool) -> Self {
        Self {
            settings,
            pool: Arc::new(RwLock::new(pool)),
            reconnecting: Arc::new(Mutex::new(())),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let pool = self.pool().await;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Operation(format!("migration failed: {}", e)))?;
        Ok(())
    }

    async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    /// Maps a failed operation to a `StoreError`, scheduling a pool check when
    /// the failure looks like a lost connection. The failed operation itself is
    /// not replayed.
    fn fail(&self, operation: &str, e: sqlx::Error) -> StoreError {
        let reconnect = needs_reconnect(&e);
        let error = classify_error(e);
        warn!(operation, error = %error, "Record store operation failed");
        if reconnect {
            self.schedule_recovery();
        }
        error
    }

    fn schedule_recovery(&self) {
        let Ok(guard) = Arc::clone(&self.reconnecting).try_lock_owned() else {
            debug!("Pool recovery already in progress.");
            return;
        };
        let settings = self.settings.clone();
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let _guard = guard;
            recover(&settings, &pool).await;
        });
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRow {
    email: String,
    name: String,
    password: String,
}
impl UserRow {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            email: self.email,
            name: self.name,
            password_hash: self.password,
        }
    }
}

#[derive(FromRow)]
struct ScanRow {
    user_email: String,
    name: String,
    age: i32,
    place: String,
    phone_number: String,
    prediction: String,
    confidence: f64,
    image_base64: Option<String>,
    submitted_at: DateTime<Utc>,
}
impl ScanRow {
    /// Rejects rows that no longer satisfy the domain invariants.
    fn to_domain(self) -> StoreResult<ScanRecord> {
        let prediction = self
            .prediction
            .parse::<ClassLabel>()
            .map_err(StoreError::Operation)?;
        let age = u32::try_from(self.age)
            .map_err(|_| StoreError::Operation(format!("negative age {} in scan record", self.age)))?;
        Ok(ScanRecord {
            user_email: self.user_email,
            patient: PatientDetails {
                name: self.name,
                age,
                place: self.place,
                phone: self.phone_number,
            },
            prediction,
            confidence: self.confidence,
            image_base64: self.image_base64,
            submitted_at: self.submitted_at,
        })
    }
}

//=========================================================================================
// `RecordStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_user(&self, email: &str, name: &str, password_hash: &str) -> StoreResult<()> {
        // The primary key on `email` makes the existence check and the insert one
        // atomic statement.
        let result = sqlx::query(
            "INSERT INTO users (email, name, password) VALUES ($1, $2, $3) ON CONFLICT (email) DO NOTHING",
        )
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .execute(&self.pool().await)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::DuplicateUser(email.to_string())),
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail("create_user", e)),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserCredentials>> {
        let result = sqlx::query_as::<_, UserRow>(
            "SELECT email, name, password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool().await)
        .await;

        match result {
            Ok(row) => Ok(row.map(UserRow::to_domain)),
            Err(e) => Err(self.fail("find_user_by_email", e)),
        }
    }

    async fn append_scan_record(&self, record: &ScanRecord) -> StoreResult<()> {
        let age = i32::try_from(record.patient.age)
            .map_err(|_| StoreError::Operation(format!("age {} out of range", record.patient.age)))?;

        let result = sqlx::query(
            "INSERT INTO scan_records \
             (user_email, name, age, place, phone_number, prediction, confidence, image_base64, submitted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&record.user_email)
        .bind(&record.patient.name)
        .bind(age)
        .bind(&record.patient.place)
        .bind(&record.patient.phone)
        .bind(record.prediction.display_name())
        .bind(record.confidence)
        .bind(record.image_base64.as_deref())
        .bind(record.submitted_at)
        .execute(&self.pool().await)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail("append_scan_record", e)),
        }
    }

    async fn list_scan_records(&self, email: &str) -> StoreResult<Vec<ScanRecord>> {
        let result = sqlx::query_as::<_, ScanRow>(
            "SELECT user_email, name, age, place, phone_number, prediction, confidence, image_base64, submitted_at \
             FROM scan_records WHERE user_email = $1 ORDER BY submitted_at DESC, id DESC",
        )
        .bind(email)
        .fetch_all(&self.pool().await)
        .await;

        match result {
            Ok(rows) => rows.into_iter().map(ScanRow::to_domain).collect(),
            Err(e) => Err(self.fail("list_scan_records", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(prediction: &str, age: i32) -> ScanRow {
        ScanRow {
            user_email: "a@x.com".to_string(),
            name: "A".to_string(),
            age,
            place: "X".to_string(),
            phone_number: "1234567890".to_string(),
            prediction: prediction.to_string(),
            confidence: 91.5,
            image_base64: None,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn connection_failures_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(classify_error(sqlx::Error::Io(io)).is_transient());
        assert!(classify_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(classify_error(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn only_lost_connections_trigger_a_rebuild() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(needs_reconnect(&sqlx::Error::Io(io)));
        assert!(needs_reconnect(&sqlx::Error::WorkerCrashed));
        assert!(!needs_reconnect(&sqlx::Error::PoolTimedOut));
        assert!(!needs_reconnect(&sqlx::Error::PoolClosed));
        assert!(!needs_reconnect(&sqlx::Error::RowNotFound));
    }

    fn unreachable_settings() -> StoreSettings {
        StoreSettings {
            url: "postgres://mri@127.0.0.1:1/mri".to_string(),
            max_connections: 1,
            retry: RetryPolicy {
                max_attempts: 1,
                delay: Duration::from_millis(10),
                attempt_timeout: Duration::from_millis(500),
            },
        }
    }

    #[tokio::test]
    async fn unreachable_pool_fails_the_liveness_check() {
        let settings = unreachable_settings();
        let pool = PgPoolOptions::new()
            .acquire_timeout(settings.connect_timeout())
            .connect_lazy(&settings.url)
            .unwrap();
        assert!(!is_alive(&pool, settings.connect_timeout()).await);
    }

    #[tokio::test]
    async fn recovery_runs_one_at_a_time() {
        let settings = unreachable_settings();
        let pool = PgPoolOptions::new().connect_lazy(&settings.url).unwrap();
        let store = PgRecordStore::with_pool(settings, pool);

        let held = Arc::clone(&store.reconnecting).try_lock_owned().unwrap();
        store.schedule_recovery();
        drop(held);
        tokio::task::yield_now().await;
        assert!(store.reconnecting.try_lock().is_ok());
    }

    #[test]
    fn other_failures_are_operation_errors() {
        assert!(matches!(
            classify_error(sqlx::Error::RowNotFound),
            StoreError::Operation(_)
        ));
        assert!(matches!(
            classify_error(sqlx::Error::ColumnNotFound("prediction".to_string())),
            StoreError::Operation(_)
        ));
    }

    #[test]
    fn rows_map_into_records() {
        let record = row("Late MCI", 70).to_domain().unwrap();
        assert_eq!(record.prediction, ClassLabel::LateMci);
        assert_eq!(record.patient.age, 70);
        assert_eq!(record.patient.phone, "1234567890");
    }

    #[test]
    fn malformed_rows_are_operation_errors() {
        assert!(matches!(
            row("Unknown", 70).to_domain(),
            Err(StoreError::Operation(_))
        ));
        assert!(matches!(
            row("MCI", -1).to_domain(),
            Err(StoreError::Operation(_))
        ));
    }
}
