/*!
 * HTTP 服务器与应用生命周期模块
 *
 * `Server` 显式管理数据库与 HTTP 服务的启动顺序：
 *
 * `Uninitialized --start()--> SchemaReady --stop()--> Disposed`
 *
 * - `start()`：连接数据库并建表，任何失败都会中止启动，服务器不会绑定端口
 * - `stop()`：关闭连接池，可重复调用
 * - `run()`：初始化日志 → `start()` → 绑定地址并提供服务 → 收到停止信号后优雅退出 → `stop()`
 */

use crate::config::Settings;
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::logging;
use crate::routes::create_router;
use crate::schema::Schema;
use crate::service::WebhookService;
use axum::{serve, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    SchemaReady,
    Disposed,
}

pub struct Server {
    settings: Arc<Settings>,
    schema: Schema,
    phase: Phase,
    db: Option<Database>,
}

impl Server {
    pub fn new(settings: Settings) -> Self {
        Self::with_schema(settings, Schema::registered())
    }

    pub fn with_schema(settings: Settings, schema: Schema) -> Self {
        Self {
            settings: Arc::new(settings),
            schema,
            phase: Phase::Uninitialized,
            db: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Connects to the database and creates the schema.
    ///
    /// On failure the phase stays `Uninitialized` and any opened pool is closed.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.phase != Phase::Uninitialized {
            return Err(AppError::Lifecycle(format!(
                "start() called in phase {:?}",
                self.phase
            )));
        }

        info!("Application startup: initializing database...");
        let db = Database::connect(&self.settings).await.inspect_err(|e| {
            error!("Database connection failed: {}", e);
        })?;

        if let Err(e) = db.create_all(&self.schema).await {
            error!("Database initialization failed: {}", e);
            db.dispose().await;
            return Err(e);
        }

        info!("Database initialized");
        self.db = Some(db);
        self.phase = Phase::SchemaReady;
        Ok(())
    }

    /// Releases pooled connections. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.phase == Phase::Disposed {
            return;
        }

        info!("Application shutdown: releasing database connections...");
        if let Some(db) = self.db.take() {
            db.dispose().await;
        }
        self.phase = Phase::Disposed;
        info!("Database connections released");
    }

    /// Builds the router over the started database.
    pub fn router(&self) -> AppResult<Router> {
        let db = match (&self.db, self.phase) {
            (Some(db), Phase::SchemaReady) => db.clone(),
            _ => {
                return Err(AppError::Lifecycle(format!(
                    "router requested in phase {:?}",
                    self.phase
                )))
            }
        };

        Ok(create_router(AppState {
            settings: self.settings.clone(),
            db,
            service: WebhookService::new(),
        }))
    }

    /// Runs the service until Ctrl-C / SIGTERM.
    pub async fn run(mut self) -> AppResult<()> {
        logging::init_logging(&self.settings.log_level, self.settings.log_file.as_deref())
            .map_err(|e| AppError::Config(format!("Failed to initialize logging: {}", e)))?;

        info!(
            "Starting {} v{} - {}",
            self.settings.app_name, self.settings.app_version, self.settings.app_description
        );
        info!("Debug mode: {}", self.settings.debug);
        info!("Log level: {}", self.settings.log_level);

        self.start().await?;

        let result = self.serve().await;
        self.stop().await;
        result
    }

    async fn serve(&self) -> AppResult<()> {
        let app = self.router()?;

        let addr = self.settings.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            AppError::Config(format!("Failed to bind to address {}: {}", addr, e))
        })?;

        info!("Server listening on http://{}", addr);
        info!("  GET  /health - Health check");
        info!("  POST /webhook/feishu - Feishu event callback");

        serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped accepting connections");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests...");
}
