/*!
 * 数据库连接和会话管理模块
 *
 * 提供 SQLite 连接池（引擎）、事务会话工厂以及两个生命周期函数：
 * - `create_all`：按表结构定义建表（幂等）
 * - `dispose`：关闭连接池，释放所有连接
 */

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::schema::Schema;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Sqlite, SqliteConnection, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Future returned by closures passed to [`Database::scoped`].
pub type SessionFuture<'s, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 's>>;

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool described by the settings. At least one connection is
    /// established before returning, so an unreachable database fails here.
    pub async fn connect(settings: &Settings) -> AppResult<Self> {
        Self::connect_with(
            &settings.database_url,
            settings.database_pool_size,
            settings.database_pool_timeout(),
            settings.database_echo,
        )
        .await
    }

    /// Pool with the default sizing, mostly for tools and tests.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        Self::connect_with(database_url, 5, Duration::from_secs(30), false).await
    }

    async fn connect_with(
        database_url: &str,
        pool_size: u32,
        acquire_timeout: Duration,
        echo: bool,
    ) -> AppResult<Self> {
        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if !echo {
            options = options.disable_statement_logging();
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        info!("Database pool created: {}", database_url);
        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates every table in `schema` inside one transaction.
    ///
    /// Uses `CREATE TABLE IF NOT EXISTS`, so repeated calls are no-ops on a
    /// matching schema. An empty schema still round-trips a connection.
    pub async fn create_all(&self, schema: &Schema) -> AppResult<()> {
        info!("Initializing database schema ({} tables)", schema.tables().len());

        let mut tx = self.pool.begin().await?;
        for table in schema.tables() {
            sqlx::query(&table.create_sql()).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Database schema initialized");
        Ok(())
    }

    /// Closes the pool. Waits for checked-out connections to be returned.
    pub async fn dispose(&self) {
        if self.pool.is_closed() {
            return;
        }
        info!("Closing database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Checks out a connection and begins a transaction on it.
    pub async fn session(&self) -> AppResult<Session> {
        let tx = self.pool.begin().await?;
        Ok(Session { tx })
    }

    /// Runs `work` inside a session: commits on `Ok`, rolls back on `Err`.
    pub async fn scoped<T, F>(&self, work: F) -> AppResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> SessionFuture<'s, T>,
    {
        let mut session = self.session().await?;

        match work(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!("Session rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

/// A transaction on a pooled connection.
///
/// Dropping a session without calling [`Session::commit`] rolls it back and
/// returns the connection to the pool.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
}

impl Session {
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    Database: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Database::from_ref(state).session().await
    }
}
