use std::sync::Arc;
use std::time::Duration;

use inventory_api::{AppState, routes};
use inventory_channel::broker::Broker;
use inventory_channel::consumer::{ConsumerConfig, GroupWorker};
use inventory_channel::producer::{Producer, ProducerConfig};
use inventory_service::audit::{AUDIT_TOPIC, AuditListener, ChannelAuditPublisher};
use inventory_service::service::PersonService;
use inventory_service::store::InMemoryPersonStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inventory_api=debug,inventory_channel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    // --- 通道装配：代理 → 生产者 → 服务 → 订阅组 worker ---
    let broker = Arc::new(Broker::new(3));
    let producer = Arc::new(Producer::connect(broker.clone(), ProducerConfig::default()));

    let service = Arc::new(PersonService::with_publisher(
        Arc::new(InMemoryPersonStore::new()),
        Arc::new(ChannelAuditPublisher::new(producer.clone())),
    ));

    // 监听器以固定延迟模拟缓慢下游（参考行为：每条 5 秒）
    let listener = Arc::new(AuditListener::with_delay(Duration::from_secs(5)));
    let worker = GroupWorker::new(
        broker.clone(),
        AUDIT_TOPIC,
        ConsumerConfig::default(),
        listener,
    )
    .start();
    tracing::info!(topic = AUDIT_TOPIC, "audit consumer started");

    // --- HTTP ---
    let app = routes::router(AppState::new(service));
    let tcp = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(tcp, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // --- 显式释放：先排空并关闭生产者，再停订阅组 worker ---
    producer.close().await;
    worker.shutdown();
    worker.join().await;
    tracing::info!("pipeline drained and stopped");

    Ok(())
}
