//! Process wiring: one store, one producer, one consumer loop
//!
//! The store is created here and handed to both the HTTP layer and the
//! consumer as an explicit shared handle. Shutdown stops the consumer first,
//! then flushes the producer so in-flight publishes are not dropped.

use crate::api::{self, AppState};
use crate::config::{Config, LogProviderKind};
use crate::consumer::{ConsumerState, ConsumerStats, EventConsumer};
use crate::error::{EventError, Result};
use crate::producer::EventProducer;
#[cfg(feature = "kafka")]
use crate::provider::kafka::{KafkaConfig, KafkaLog};
use crate::provider::memory::MemoryLog;
use crate::provider::nats::{NatsConfig, NatsLog};
use crate::provider::LogClient;
use crate::store::EventStore;
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running activity pipeline
pub struct Pipeline {
    config: Config,
    store: Arc<EventStore>,
    producer: Arc<EventProducer>,
    shutdown: CancellationToken,
    consumer: JoinHandle<Result<()>>,
    consumer_state: watch::Receiver<ConsumerState>,
    stats: Arc<ConsumerStats>,
}

impl Pipeline {
    /// Connect to the configured log backend and start consuming
    pub async fn start(config: Config) -> Result<Self> {
        let log: Arc<dyn LogClient> = match config.log.provider {
            LogProviderKind::Memory => Arc::new(MemoryLog::default()),
            LogProviderKind::Nats => {
                Arc::new(NatsLog::connect(NatsConfig::from_log_config(&config.log)).await?)
            }
            #[cfg(feature = "kafka")]
            LogProviderKind::Kafka => Arc::new(
                KafkaLog::connect(KafkaConfig::from_settings(&config.log, &config.producer))
                    .await?,
            ),
            #[cfg(not(feature = "kafka"))]
            LogProviderKind::Kafka => {
                return Err(EventError::Config(
                    "kafka provider requires the `kafka` feature".to_string(),
                ))
            }
        };
        Ok(Self::start_with_log(config, log))
    }

    /// Start consuming from an already-connected log client
    pub fn start_with_log(config: Config, log: Arc<dyn LogClient>) -> Self {
        let store = Arc::new(EventStore::new());
        let producer = Arc::new(EventProducer::new(
            log.clone(),
            config.log.topic.clone(),
            config.producer.clone(),
        ));
        let consumer = EventConsumer::new(
            log,
            store.clone(),
            config.log.topic.clone(),
            config.log.group_id.clone(),
            config.consumer.clone(),
        );
        let consumer_state = consumer.state();
        let stats = consumer.stats();

        let shutdown = CancellationToken::new();
        let consumer = consumer.spawn(shutdown.child_token());

        tracing::info!(
            topic = %config.log.topic,
            group = %config.log.group_id,
            provider = producer.provider_name(),
            "Activity pipeline started"
        );

        Self {
            config,
            store,
            producer,
            shutdown,
            consumer,
            consumer_state,
            stats,
        }
    }

    /// HTTP router over this pipeline's producer and store
    pub fn router(&self) -> Router {
        api::create_router(Arc::new(AppState {
            producer: self.producer.clone(),
            store: self.store.clone(),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<EventStore> {
        self.store.clone()
    }

    pub fn producer(&self) -> Arc<EventProducer> {
        self.producer.clone()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    pub fn consumer_state(&self) -> watch::Receiver<ConsumerState> {
        self.consumer_state.clone()
    }

    /// Stop the consumer, wait for it to close, then flush the producer
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();

        let consumed = match self.consumer.await {
            Ok(result) => result,
            Err(e) => Err(EventError::Consumer(format!("consumer task failed: {}", e))),
        };
        if let Err(ref e) = consumed {
            tracing::error!(error = %e, "Event consumer exited with error");
        }

        let flushed = self.producer.flush().await;
        if let Err(ref e) = flushed {
            tracing::warn!(error = %e, "Producer flush incomplete");
        }

        tracing::info!(
            processed = self.stats.processed(),
            skipped = self.stats.skipped(),
            transient_errors = self.stats.transient_errors(),
            "Activity pipeline stopped"
        );

        consumed.and(flushed)
    }
}
