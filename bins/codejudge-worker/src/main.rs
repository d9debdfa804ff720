use anyhow::Context;
use codejudge_common::logging;
use codejudge_common::redis::{RedisQueue, RedisStore};
use codejudge_common::Config;
use codejudge_worker::consumer::Consumer;
use codejudge_worker::{DockerSandbox, Grader, RuntimeGateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = Config::from_env();
    info!(
        queue = %config.queue_name,
        max_parallel_runs = config.max_parallel_runs,
        "codejudge worker booting"
    );

    let gateway = RuntimeGateway::connect().context("failed to connect to Docker daemon")?;
    let sandbox = DockerSandbox::new(gateway);

    // leftovers from a previous crash; nothing of ours is live yet
    match sandbox.reap_orphans().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "reaped orphaned sandbox objects"),
        Err(err) => warn!(error = %err, "failed to reap orphaned sandbox objects"),
    }

    let client = ::redis::Client::open(config.redis_url.as_str())
        .with_context(|| format!("invalid redis url {}", config.redis_url))?;
    let conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .context("failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, "connected to Redis");

    let store = Arc::new(RedisStore::new(conn.clone()));
    let queue = Arc::new(RedisQueue::new(conn, &config.queue_name));
    let grader = Arc::new(Grader::new(
        Arc::new(sandbox),
        store.clone(),
        store,
        config.max_parallel_runs,
    ));
    let consumer = Consumer::new(grader, queue, Duration::from_secs(config.pop_timeout_secs));

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, finishing current submission");
                let _ = stop.send(true);
            }
            Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
        }
    });

    consumer.run(shutdown).await;
    info!("worker shutdown complete");
    Ok(())
}
