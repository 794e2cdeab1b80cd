//! 网关进程入口

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tracker_gateway::domain::repository::Repository;
use tracker_gateway::infrastructure::memory::MemoryRepository;
use tracker_gateway::{Gateway, Result, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
    let settings = Settings::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    info!(config = %config_path, "starting tracker gateway");

    // 单机部署用内存仓储；生产环境替换为外部持久化服务的实现
    let repository = MemoryRepository::new() as Arc<dyn Repository>;
    let gateway = Gateway::build(settings, repository)?;
    gateway.run().await
}
