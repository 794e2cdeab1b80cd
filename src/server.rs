//! 网关装配与启动
//!
//! 启动期一次性构造所有共享组件（缓存、定位解析上下文、驱动、
//! 连接管理器），随后各自在独立任务里运行。除启动失败外，
//! 运行期任何单条消息的问题都不会终止进程。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::application::{CommandService, MessageProcessor};
use crate::config::Settings;
use crate::domain::repository::Repository;
use crate::error::{GatewayError, Result};
use crate::infrastructure::auth::JwtVerifier;
use crate::infrastructure::cache::LocalCache;
use crate::infrastructure::command_tracker::CommandTracker;
use crate::infrastructure::location::LocationResolver;
use crate::interface::ws::{WsManager, WsState, ws_handler};
use crate::vendors::btt::{BttAdapter, BttDriver};
use crate::vendors::v53::V53Driver;
use crate::vendors::{DriverRegistry, StatusHandler, SubscriptionProvider};

/// 缓存快照落盘周期
const CACHE_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

pub struct Gateway {
    settings: Settings,
    pub repository: Arc<dyn Repository>,
    pub ws: Arc<WsManager>,
    pub tracker: Arc<CommandTracker>,
    pub registry: Arc<DriverRegistry>,
    pub commands: Arc<CommandService>,
    cache: Arc<LocalCache>,
}

impl Gateway {
    pub fn build(settings: Settings, repository: Arc<dyn Repository>) -> Result<Self> {
        let snapshot = PathBuf::from(&settings.data_path).join("cache.json");
        let cache = LocalCache::new(Some(snapshot));
        let resolver = LocationResolver::from_config(&settings.location);

        let ws = WsManager::new();
        let tracker = CommandTracker::new();
        let processor = MessageProcessor::new(
            Arc::clone(&repository),
            Arc::clone(&ws),
            Arc::clone(&tracker),
        );

        let adapter = BttAdapter::new(Arc::clone(&cache), Arc::clone(&resolver));
        let btt = BttDriver::new(
            &settings.mqtt,
            adapter,
            Arc::clone(&processor) as Arc<dyn StatusHandler>,
            Arc::clone(&processor) as Arc<dyn SubscriptionProvider>,
        );
        let v53 = V53Driver::new(
            &settings.v53,
            Arc::clone(&cache),
            resolver,
            Arc::clone(&processor) as Arc<dyn StatusHandler>,
        );

        let mut registry = DriverRegistry::new();
        registry.register(btt)?;
        registry.register(v53)?;
        let registry = Arc::new(registry);

        let commands = CommandService::new(
            Arc::clone(&repository),
            Arc::clone(&registry),
            Arc::clone(&tracker),
        );

        Ok(Self {
            settings,
            repository,
            ws,
            tracker,
            registry,
            commands,
            cache,
        })
    }

    /// 启动所有驱动、后台任务和推送端口，阻塞直到推送端口退出
    pub async fn run(&self) -> Result<()> {
        self.registry.start_all().await;
        self.tracker.start_sweeper();
        self.ws.start_sweeper(self.settings.server.ws_sweep_secs);
        self.cache.start_flusher(CACHE_FLUSH_INTERVAL);

        let state = WsState {
            manager: Arc::clone(&self.ws),
            verifier: Arc::new(JwtVerifier::new(&self.settings.jwt)),
            auth_timeout: Duration::from_secs(self.settings.server.ws_auth_timeout_secs),
        };
        let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

        let addr = ("0.0.0.0", self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Transport(format!("bind ws port {}: {e}", addr.1)))?;
        info!(port = addr.1, "websocket push endpoint listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| GatewayError::Transport(format!("ws server: {e}")))
    }
}
