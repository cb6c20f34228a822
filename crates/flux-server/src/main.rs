use anyhow::Result;
use clap::Parser;
use flux_config::ConfigLoader;
use flux_core::MemoryStore;
use flux_server::{build_transport, init_logging, AlertingApp};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置目录（读取其中的 alerting.toml）
    #[arg(short, long, default_value = "./config")]
    config_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置
    let config = ConfigLoader::new(&args.config_dir).load()?;

    // 初始化日志
    init_logging(&config.logging)?;
    info!(config_dir = %args.config_dir, "Starting FLUX alerting service");

    let transport = build_transport(&config)?;
    let auto_start = config.monitor.auto_start;

    // 文档存储使用进程内实现
    let store = Arc::new(MemoryStore::new());
    let app = AlertingApp::new(config, store, transport);
    info!("Alerting service initialized");

    if auto_start {
        app.start_monitoring().await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    app.stop_monitoring().await;
    info!("FLUX alerting service stopped");
    Ok(())
}
