//! Cancellable consumption loop with explicit acknowledgement decisions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{Classify, ErrorClass, RetryStrategy, Telemetry, retry};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Delivery, Subscription};
use crate::error::BrokerError;
use crate::event::EventEnvelope;

/// Reacts to events delivered on one subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: std::error::Error + Classify + Send + Sync + 'static;

    /// Name used for the queue and in logs and metrics.
    fn name(&self) -> &'static str;

    /// Topic patterns the handler's queue is bound to.
    fn binding_keys(&self) -> Vec<String>;

    /// Applies the event. Only return `Ok` once every side effect is done.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), Self::Error>;
}

/// Consumer loop settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Deliveries allowed before a message is dead-lettered.
    pub max_deliveries: u32,
    /// Pause before requeueing a transient failure.
    pub requeue_delay: Duration,
    /// Time the in-flight handler gets after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Backoff used when the subscription has to be re-established.
    pub resubscribe: RetryStrategy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 10,
            requeue_delay: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(10),
            resubscribe: RetryStrategy::fixed(5, Duration::from_secs(2)),
        }
    }
}

/// Counts of what a consumer did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    /// True if the in-flight handler was abandoned at shutdown.
    pub forced_stop: bool,
}

/// Errors that end a consumer loop.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Consumer '{consumer}' could not subscribe: {source}")]
    Subscribe {
        consumer: &'static str,
        #[source]
        source: BrokerError,
    },

    #[error("Consumer '{consumer}' hit a fatal error: {message}")]
    Fatal {
        consumer: &'static str,
        message: String,
    },
}

impl Classify for ConsumerError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Drives one [`MessageHandler`] against one subscription.
///
/// Deliveries are processed strictly one at a time. The handler's error class
/// decides the acknowledgement: transient failures are requeued, validation
/// and conflict failures are dead-lettered and fatal failures stop the loop.
pub struct Consumer<H: MessageHandler> {
    handler: Arc<H>,
    broker: Arc<dyn Broker>,
    config: ConsumerConfig,
    telemetry: Telemetry,
}

impl<H: MessageHandler> Consumer<H> {
    /// Creates a new consumer.
    pub fn new(
        handler: Arc<H>,
        broker: Arc<dyn Broker>,
        config: ConsumerConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            handler,
            broker,
            config,
            telemetry,
        }
    }

    /// Consumes until `shutdown` is cancelled or a fatal error occurs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ConsumerReport, ConsumerError> {
        let name = self.handler.name();
        let bindings = self.handler.binding_keys();
        let mut subscription = self.subscribe(&bindings).await?;
        let mut report = ConsumerReport::default();

        tracing::info!(consumer = name, queue = subscription.queue(), "consumer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = subscription.next() => next,
            };

            let Some(delivery) = next else {
                if shutdown.is_cancelled() {
                    break;
                }
                tracing::warn!(consumer = name, "subscription ended, resubscribing");
                self.telemetry.incr("consumer_resubscribes_total");
                subscription = self.subscribe(&bindings).await?;
                continue;
            };

            if let Flow::Stop = self.process(delivery, &shutdown, &mut report).await? {
                break;
            }
        }

        tracing::info!(
            consumer = name,
            acked = report.acked,
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            forced_stop = report.forced_stop,
            "consumer stopped"
        );
        Ok(report)
    }

    async fn subscribe(&self, bindings: &[String]) -> Result<Subscription, ConsumerError> {
        let name = self.handler.name();
        let broker = &self.broker;
        retry(
            &self.config.resubscribe,
            name,
            BrokerError::is_transient,
            || broker.subscribe(name, bindings),
        )
        .await
        .map_err(|e| ConsumerError::Subscribe {
            consumer: name,
            source: e.into_inner(),
        })
    }

    async fn process(
        &self,
        delivery: Delivery,
        shutdown: &CancellationToken,
        report: &mut ConsumerReport,
    ) -> Result<Flow, ConsumerError> {
        let name = self.handler.name();

        let envelope = match delivery.decode() {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(
                    consumer = name,
                    routing_key = %delivery.metadata.routing_key,
                    error = %error,
                    "dead-lettering malformed message"
                );
                self.dead_letter(delivery, &error.to_string(), report).await;
                return Ok(Flow::Continue);
            }
        };
        let order_id = envelope.order_id();

        if envelope.metadata.delivery_count > self.config.max_deliveries {
            tracing::warn!(
                consumer = name,
                order_id = %order_id,
                delivery_count = envelope.metadata.delivery_count,
                "dead-lettering message past its delivery limit"
            );
            self.dead_letter(delivery, "delivery limit exceeded", report)
                .await;
            return Ok(Flow::Continue);
        }

        let started = Instant::now();
        let handling = self.handler.handle(&envelope);
        tokio::pin!(handling);

        let interrupted = tokio::select! {
            biased;
            result = &mut handling => Ok(result),
            _ = shutdown.cancelled() => Err(()),
        };
        let result = match interrupted {
            Ok(result) => result,
            Err(()) => match tokio::time::timeout(self.config.shutdown_grace, &mut handling).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        consumer = name,
                        order_id = %order_id,
                        grace_ms = self.config.shutdown_grace.as_millis() as u64,
                        "handler did not finish within the shutdown grace period, requeueing"
                    );
                    self.telemetry.incr("consumer_forced_stops_total");
                    report.forced_stop = true;
                    if let Err(error) = delivery.nack(true).await {
                        tracing::warn!(consumer = name, error = %error, "requeue failed");
                    }
                    return Ok(Flow::Stop);
                }
            },
        };
        self.telemetry
            .record_duration("handler_duration_seconds", started.elapsed());

        let error = match result {
            Ok(()) => {
                match delivery.ack().await {
                    Ok(()) => {
                        report.acked += 1;
                        self.telemetry
                            .incr_with("messages_processed_total", "outcome", "acked");
                    }
                    Err(error) => {
                        tracing::warn!(consumer = name, order_id = %order_id, error = %error, "ack failed");
                    }
                }
                return Ok(Flow::Continue);
            }
            Err(error) => error,
        };

        match error.class() {
            ErrorClass::Transient => {
                tracing::warn!(
                    consumer = name,
                    order_id = %order_id,
                    delivery_count = envelope.metadata.delivery_count,
                    error = %error,
                    "transient failure, requeueing"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.config.requeue_delay) => {}
                    _ = shutdown.cancelled() => {}
                }
                match delivery.nack(true).await {
                    Ok(()) => {
                        report.requeued += 1;
                        self.telemetry
                            .incr_with("messages_processed_total", "outcome", "requeued");
                    }
                    Err(error) => {
                        tracing::warn!(consumer = name, order_id = %order_id, error = %error, "requeue failed");
                    }
                }
                Ok(Flow::Continue)
            }
            class @ (ErrorClass::Validation | ErrorClass::Conflict) => {
                tracing::warn!(
                    consumer = name,
                    order_id = %order_id,
                    class = %class,
                    error = %error,
                    "dead-lettering message"
                );
                self.dead_letter(delivery, &error.to_string(), report).await;
                Ok(Flow::Continue)
            }
            ErrorClass::Fatal => {
                tracing::error!(consumer = name, order_id = %order_id, error = %error, "fatal handler error");
                if let Err(nack_error) = delivery.nack(true).await {
                    tracing::warn!(consumer = name, error = %nack_error, "requeue failed");
                }
                Err(ConsumerError::Fatal {
                    consumer: name,
                    message: error.to_string(),
                })
            }
        }
    }

    async fn dead_letter(&self, delivery: Delivery, reason: &str, report: &mut ConsumerReport) {
        match delivery.dead_letter(reason).await {
            Ok(()) => {
                report.dead_lettered += 1;
                self.telemetry
                    .incr_with("messages_processed_total", "outcome", "dead_lettered");
            }
            Err(error) => {
                tracing::warn!(consumer = self.handler.name(), error = %error, "dead-letter failed");
            }
        }
    }
}
