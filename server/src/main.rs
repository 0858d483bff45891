//! Herald node entrypoint.
//!
//! Brings the pipeline up in dependency order (storage, shared region,
//! bus, workers, HTTP) with every collaborator passed through
//! constructors. Exits non-zero when migrations fail or the bus is
//! unreachable at startup. On SIGINT/SIGTERM the node refuses new
//! connects, drains push queues and the outbox, and stops its workers.

mod config;
mod directory;

use anyhow::Context;
use config::Config;
use directory::HttpRecipientDirectory;
use herald_orchestrator::{
    ConsumerConfig, OrchestrationConsumer, OutboxRelay, RedriveService, RelayConfig, Scheduler,
    SchedulerConfig, TargetPlanner,
};
use herald_postgres::{
    BroadcastRepository, DeadLetterStore, DeliveryRepository, Outbox, PreferencesRepository,
    SchedulerLock, SessionMirror, StatisticsRepository,
};
use herald_push::{PushConfig, PushDispatcher, PushSessionManager};
use herald_redis::{RedisFaultFlags, RedisInboxCache, RedisSessionRegistry};
use herald_redpanda::{KafkaBusConsumer, KafkaEventBus};
use herald_web::{AppState, build_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        node_id = %config.node.node_id,
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        "Starting Herald node"
    );

    // Storage first; a failed migration is fatal.
    let pool = herald_postgres::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("database unreachable")?;
    herald_postgres::run_migrations(&pool)
        .await
        .context("database migration failed")?;

    // Shared distributed region.
    let redis_conn = herald_redis::connect(&config.redis.url)
        .await
        .context("redis unreachable")?;
    let registry = Arc::new(RedisSessionRegistry::new(
        redis_conn.clone(),
        config.registry_ttl_secs(),
    ));
    let cache = Arc::new(RedisInboxCache::new(
        redis_conn.clone(),
        config.redis.inbox_ttl_secs,
    ));
    let flags = Arc::new(RedisFaultFlags::new(redis_conn));

    // Bus: both consumer groups must subscribe before we accept traffic.
    let bus = Arc::new(
        KafkaEventBus::builder()
            .brokers(&config.kafka.brokers)
            .producer_acks("all")
            .build()
            .context("bus unreachable at startup")?,
    );
    let topic = config.kafka.topic.clone();
    let dlt_topic = herald_core::bus::dead_letter_topic(&topic);
    let orchestration_consumer = Arc::new(
        KafkaBusConsumer::subscribe(
            &config.kafka.brokers,
            "herald-orchestrator",
            &[&topic, &dlt_topic],
        )
        .context("bus unreachable at startup")?,
    );
    let push_consumer = Arc::new(
        KafkaBusConsumer::subscribe(&config.kafka.brokers, &config.push_group(), &[&topic])
            .context("bus unreachable at startup")?,
    );

    // Repositories.
    let outbox = Outbox::new(pool.clone());
    let broadcasts = BroadcastRepository::new(pool.clone());
    let deliveries = DeliveryRepository::new(pool.clone());
    let statistics = StatisticsRepository::new(pool.clone());
    let preferences = PreferencesRepository::new(pool.clone());
    let dead_letters = DeadLetterStore::new(pool.clone());
    let mirror = SessionMirror::new(pool.clone());

    // External collaborator.
    let recipient_directory = Arc::new(
        HttpRecipientDirectory::new(config.directory.url.clone())
            .context("directory client construction failed")?,
    );

    // Pipeline components, wired explicitly.
    let planner = Arc::new(TargetPlanner::new(
        recipient_directory.clone(),
        outbox.clone(),
        config.consumer.targeting_batch_size,
    ));

    let push = Arc::new(PushSessionManager::new(
        PushConfig {
            node_id: config.node.node_id.clone(),
            cluster_id: config.node.cluster_id.clone(),
            topic: topic.clone(),
            queue_capacity: config.push.queue_capacity,
            flush_timeout: Duration::from_millis(config.push.flush_timeout_ms),
            overflow_limit: config.push.overflow_limit,
            overflow_window: Duration::from_secs(config.push.overflow_window_secs),
            heartbeat_interval: config.heartbeat(),
            drain_grace: Duration::from_secs(config.push.drain_grace_secs),
        },
        registry.clone(),
        mirror.clone(),
        deliveries.clone(),
        outbox.clone(),
    ));

    // Arc'd so the shutdown path below can flush the outbox one last time
    // after the relay worker has stopped.
    let relay = Arc::new(OutboxRelay::new(
        outbox.clone(),
        bus.clone(),
        SchedulerLock::new(pool.clone(), config.node.node_id.clone()),
        RelayConfig {
            batch_size: config.relay.batch_size,
            drain_interval: Duration::from_millis(config.relay.drain_interval_ms),
            ..RelayConfig::default()
        },
    ));

    let consumer = OrchestrationConsumer::new(
        orchestration_consumer,
        bus.clone(),
        outbox.clone(),
        broadcasts.clone(),
        deliveries.clone(),
        dead_letters.clone(),
        registry.clone(),
        cache.clone(),
        flags.clone(),
        preferences.clone(),
        planner.clone(),
        ConsumerConfig {
            topic: topic.clone(),
            max_retries: config.consumer.max_retries,
            processing_deadline: Duration::from_secs(config.consumer.processing_deadline_secs),
            ..ConsumerConfig::default()
        },
    );

    let dispatcher = PushDispatcher::new(push_consumer, push.clone());

    let scheduler = Scheduler::new(
        SchedulerLock::new(pool.clone(), config.node.node_id.clone()),
        outbox.clone(),
        broadcasts.clone(),
        registry.clone(),
        mirror,
        cache.clone(),
        dead_letters.clone(),
        planner,
        SchedulerConfig {
            topic: topic.clone(),
            tick: Duration::from_secs(config.scheduler.tick_secs),
            prefetch_window: Duration::from_secs(config.scheduler.prefetch_window_secs),
            session_stale_threshold: Duration::from_secs(config.scheduler.session_stale_secs),
            inbox_cleanup_tick: Duration::from_secs(config.scheduler.inbox_cleanup_tick_secs),
            inbox_cache_threshold: config.scheduler.inbox_cache_threshold,
            session_retention: Duration::from_secs(config.scheduler.session_retention_secs),
            dlt_retention: Duration::from_secs(config.scheduler.dlt_retention_secs),
            ..SchedulerConfig::default()
        },
    );

    let redrive = Arc::new(RedriveService::new(
        dead_letters,
        outbox.clone(),
        broadcasts.clone(),
        flags.clone(),
        topic.clone(),
    ));

    // Background workers.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = tokio::task::JoinSet::new();
    {
        let rx = shutdown_rx.clone();
        let relay = relay.clone();
        workers.spawn(async move { relay.run(rx).await });
    }
    {
        let rx = shutdown_rx.clone();
        workers.spawn(async move {
            if let Err(e) = consumer.run(rx).await {
                // Fatal consumer errors abort the node; the supervisor
                // (systemd, Kubernetes) restarts it.
                tracing::error!(error = %e, "Orchestration consumer died");
                std::process::exit(1);
            }
        });
    }
    {
        let rx = shutdown_rx.clone();
        workers.spawn(async move { dispatcher.run(rx).await });
    }
    {
        let rx = shutdown_rx.clone();
        workers.spawn(async move { scheduler.run(rx).await });
    }
    {
        let rx = shutdown_rx.clone();
        let push = push.clone();
        workers.spawn(async move { push.run_heartbeat(rx).await });
    }

    // HTTP surface.
    let state = AppState {
        broadcasts,
        deliveries,
        statistics,
        preferences,
        outbox,
        push: push.clone(),
        cache,
        flags,
        redrive,
        directory: recipient_directory,
        topic,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Herald node serving");

    let server_shutdown = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            let _ = server_shutdown.send(true);
        })
        .await
        .context("http server failed")?;

    // Graceful drain: no new connects, flush push queues, stop workers,
    // then flush the outbox. The push drain spools its final DELIVERED
    // events into the outbox, and the relay worker may already be past its
    // last tick, so the explicit drain afterwards is what empties them.
    let _ = shutdown_tx.send(true);
    push.drain().await;
    while workers.join_next().await.is_some() {}
    if let Err(e) = relay.drain_pending().await {
        tracing::warn!(error = %e, "Final outbox drain failed; another node's relay will pick the rows up");
    }
    tracing::info!("Herald node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
