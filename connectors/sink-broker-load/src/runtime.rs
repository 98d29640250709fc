//! Consume loop for the Broker Load Sink.
//!
//! Messages are buffered until the batch is full or its oldest message has
//! waited `batch_timeout_ms`. Each batch is handed to the sink and its
//! messages are acknowledged once the sink returns, whether the batch was
//! loaded or retained in staging. A fatal load error stops the runtime with
//! the batch unacknowledged.

use crate::config::ConnectorConfig;
use crate::connector::BrokerLoadSink;
use crate::record::SinkRecord;
use broker_load_core::{ConnectorError, ConnectorResult, LoadState};
use danube_client::{Consumer, DanubeClient};
use danube_core::message::StreamMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Messages collected for the next load
#[derive(Debug)]
pub struct PendingBatch {
    messages: Vec<StreamMessage>,
    capacity: usize,
    started: Option<Instant>,
}

impl PendingBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Vec::with_capacity(capacity.min(1024)),
            capacity,
            started: None,
        }
    }

    pub fn push(&mut self, message: StreamMessage) {
        if self.messages.is_empty() {
            self.started = Some(Instant::now());
        }
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// When the batch must be flushed, `None` while it is empty
    pub fn deadline(&self, timeout: Duration) -> Option<Instant> {
        self.started.map(|started| started + timeout)
    }

    pub fn take(&mut self) -> Vec<StreamMessage> {
        self.started = None;
        std::mem::take(&mut self.messages)
    }
}

/// Runtime driving a [`BrokerLoadSink`] from a Danube subscription
pub struct SinkRuntime {
    sink: BrokerLoadSink,
    client: DanubeClient,
    config: ConnectorConfig,
}

impl SinkRuntime {
    /// Create a new sink runtime
    pub async fn new(sink: BrokerLoadSink) -> ConnectorResult<Self> {
        let config = sink.config().core.clone();
        config.validate()?;

        info!("Initializing Sink Runtime");
        info!("Connector: {}", config.connector_name);
        info!("Danube URL: {}", config.danube_service_url);
        info!("Topic: {}", config.topic);
        info!("Subscription: {}", config.subscription);

        let client = DanubeClient::builder()
            .service_url(&config.danube_service_url)
            .build()
            .await
            .map_err(|e| ConnectorError::fatal_with_source("Failed to create Danube client", e))?;

        Ok(Self {
            sink,
            client,
            config,
        })
    }

    /// Run until ctrl-c, the end of the message stream, or a fatal error
    pub async fn run(&mut self) -> ConnectorResult<()> {
        info!("Starting Sink Runtime");

        info!("Creating consumer");
        let mut consumer = self
            .client
            .new_consumer()
            .with_topic(&self.config.topic)
            .with_consumer_name(&self.config.connector_name)
            .with_subscription(&self.config.subscription)
            .with_subscription_type(self.config.subscription_type.into())
            .build();

        consumer
            .subscribe()
            .await
            .map_err(|e| ConnectorError::fatal_with_source("Failed to subscribe to topic", e))?;
        info!("Consumer subscribed successfully");

        let message_stream = consumer
            .receive()
            .await
            .map_err(|e| ConnectorError::fatal_with_source("Failed to start message stream", e))?;
        info!("Message stream started");

        let result = self.consume(&mut consumer, message_stream).await;

        info!("Shutting down connector");
        if let Err(e) = self.sink.shutdown().await {
            error!("Failed to shut down sink cleanly: {}", e);
            if result.is_ok() {
                return Err(e);
            }
        }
        info!("Sink Runtime stopped");

        result
    }

    async fn consume(
        &mut self,
        consumer: &mut Consumer,
        mut message_stream: mpsc::Receiver<StreamMessage>,
    ) -> ConnectorResult<()> {
        let timeout = self.config.batch_timeout();
        let mut pending = PendingBatch::new(self.config.batch_size);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("Entering main processing loop");
        loop {
            let deadline = pending.deadline(timeout);

            tokio::select! {
                signal = &mut shutdown => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for ctrl-c: {}", e);
                    }
                    info!("Received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!("Batch timeout reached with {} messages", pending.len());
                    self.flush(consumer, &mut pending).await?;
                }
                message = message_stream.recv() => match message {
                    Some(message) => {
                        debug!(
                            "Buffered message: topic={}, offset={}",
                            message.msg_id.topic_name, message.msg_id.topic_offset
                        );
                        pending.push(message);
                        if pending.is_full() {
                            self.flush(consumer, &mut pending).await?;
                        }
                    }
                    None => {
                        warn!("Message stream closed");
                        break;
                    }
                }
            }
        }

        // load whatever was buffered before stopping
        self.flush(consumer, &mut pending).await
    }

    async fn flush(
        &mut self,
        consumer: &mut Consumer,
        pending: &mut PendingBatch,
    ) -> ConnectorResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let messages = pending.take();
        let records: Vec<SinkRecord> = messages
            .iter()
            .cloned()
            .map(SinkRecord::from_stream_message)
            .collect();

        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            debug!(
                "Flushing {} messages from {} (offsets {}..={})",
                records.len(),
                first.topic(),
                first.offset(),
                last.offset()
            );
        }

        match self.sink.write_batch(&records).await? {
            Some(report) if report.state == LoadState::Loaded => info!(
                "Loaded {} records ({} bytes) as {} after {} attempt(s)",
                report.records_written, report.bytes_written, report.label, report.attempts
            ),
            Some(report) => warn!(
                "Batch {} ended as {} after {} timeout(s)",
                report.label, report.state, report.timeouts
            ),
            None => warn!("Dropped batch of {} undecodable messages", records.len()),
        }

        for message in &messages {
            if let Err(e) = consumer.ack(message).await {
                error!("Failed to acknowledge message: {}", e);
            }
        }
        debug!("Acknowledged {} messages", messages.len());

        Ok(())
    }
}
