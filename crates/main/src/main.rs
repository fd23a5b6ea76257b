//! 主应用程序入口
//!
//! 加载配置、装配存储与用例服务，启动 Axum HTTP / WebSocket 服务。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use application::{LoginRateLimiter, MemoryStore, MessagingHub, SystemClock};
use axum::http::{HeaderValue, Method};
use config::{AppConfig, StorageBackend};
use infrastructure::{create_pg_pool, BcryptPasswordHasher, PgStorage, MIGRATOR};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let repositories = match config.database.backend {
        StorageBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("database.url is required for the postgres backend")?;
            let pool = create_pg_pool(url, config.database.max_connections).await?;
            if config.database.run_migrations {
                MIGRATOR.run(&pool).await?;
                tracing::info!("数据库迁移完成");
            }
            Repositories::postgres(&PgStorage::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("使用内存存储，重启后数据丢失");
            Repositories::memory(Arc::new(MemoryStore::new()))
        }
    };

    let (hub, hub_task) = MessagingHub::spawn(config.realtime.hub_queue_capacity);
    let state = AppState::build(
        &config,
        repositories,
        Arc::new(BcryptPasswordHasher::new(config.auth.bcrypt_cost)),
        Arc::new(SystemClock),
        hub,
    );

    let cleanup = spawn_limiter_cleanup(
        state.login_limiter.clone(),
        Duration::from_secs(config.rate_limit.cleanup_interval_seconds),
    );

    let app = router(state).layer(cors_layer(&config.server.cors_origins));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("聊天服务启动在 http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.abort();
    hub_task.abort();
    tracing::info!("服务已停止");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// 定期清理长时间空闲的登录限流桶
fn spawn_limiter_cleanup(
    limiter: Arc<LoginRateLimiter>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.cleanup();
            if removed > 0 {
                tracing::debug!(removed, "清理空闲限流桶");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听 Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到停止信号");
}
