use std::sync::Arc;

use jobstream::checkpoint::build_checkpointer;
use jobstream::config::PipelineConfig;
use jobstream::executor::EchoExecutor;
use jobstream::queue::{CancelFlags, EventLog, JobQueue, StatusStore};
use jobstream::store::connect_backend;
use jobstream::worker::{JobWorker, PollConfig, PollWorker, StopFlag, WorkerDeps};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log to the console and to logs/worker.log
    let file_appender = tracing_appender::rolling::daily("logs", "worker.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let config = PipelineConfig::from_env()?;

    eprintln!("⚙️  jobstream worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.store.backend);
    eprintln!("   Queue key: {}", config.queue.pending_key);
    eprintln!(
        "   Poll interval: {}ms\n",
        config.worker.poll_interval.as_millis()
    );

    let backend = connect_backend(&config.store).await?;
    let checkpointer = build_checkpointer(
        config.store.backend,
        Arc::clone(&backend),
        &config.queue.checkpoint_prefix,
        config.store.checkpoint_ttl,
    );

    let deps = WorkerDeps {
        queue: JobQueue::new(Arc::clone(&backend), config.queue.pending_key.clone()),
        log: EventLog::new(
            Arc::clone(&backend),
            config.queue.stream_prefix.clone(),
            config.queue.done_ttl,
        ),
        status: StatusStore::new(Arc::clone(&backend), config.queue.status_prefix.clone()),
        cancels: CancelFlags::new(
            Arc::clone(&backend),
            config.queue.cancel_prefix.clone(),
            config.queue.cancel_ttl,
        ),
        checkpointer,
        // Placeholder executor until a conversation graph is wired in
        executor: Arc::new(EchoExecutor),
    };
    let worker = JobWorker::new(
        deps,
        PollConfig {
            poll_interval: config.worker.poll_interval,
            max_backoff: config.worker.max_backoff,
        },
    );

    let stop = StopFlag::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested; finishing current job");
                stop.stop();
            }
        });
    }

    worker.run(stop).await;
    Ok(())
}
