use crate::config::Config;
use crate::delivery::{Acknowledge, DeliveryState, Incoming};
use crate::error::ConnectionError;
use crate::forwarder::ObservationSink;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{error, info};

const PREFETCH_COUNT: u16 = 1;
const REPLY_SUCCESS: u16 = 200;

pub struct RabbitConsumer {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer_tag: String,
}

impl RabbitConsumer {
    pub async fn connect(config: &Config) -> Result<Self> {
        let uri = config.amqp_uri();
        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .with_context(|| format!("connect to rabbitmq at {}", config.broker_addr()))?;

        let channel = connection
            .create_channel()
            .await
            .context("open amqp channel")?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .context("set channel prefetch")?;

        channel
            .queue_declare(
                &config.rabbit_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("declare queue {}", config.rabbit_queue))?;

        info!(
            broker = %config.broker_addr(),
            queue = %config.rabbit_queue,
            prefetch = PREFETCH_COUNT,
            "connected to rabbitmq"
        );

        Ok(Self {
            connection,
            channel,
            queue: config.rabbit_queue.clone(),
            consumer_tag: config.rabbit_consumer_tag.clone(),
        })
    }

    /// Starts a manual-ack consumer on the configured queue.
    pub async fn deliveries(
        &self,
    ) -> Result<BoxStream<'static, Result<Incoming<Acker>, ConnectionError>>> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("consume queue {}", self.queue))?;

        Ok(consumer.map(into_incoming).boxed())
    }

    pub async fn close(&self) -> Result<()> {
        self.channel
            .close(REPLY_SUCCESS, "consumer shutdown")
            .await
            .context("close amqp channel")?;
        self.connection
            .close(REPLY_SUCCESS, "consumer shutdown")
            .await
            .context("close amqp connection")?;
        Ok(())
    }
}

fn into_incoming(
    delivery: Result<Delivery, lapin::Error>,
) -> Result<Incoming<Acker>, ConnectionError> {
    delivery.map(Incoming::from).map_err(ConnectionError::from)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub confirmed: u64,
    pub requeued: u64,
    pub rejected: u64,
}

impl LoopReport {
    fn record(&mut self, state: DeliveryState) {
        match state {
            DeliveryState::Confirmed => self.confirmed += 1,
            DeliveryState::Requeued => self.requeued += 1,
            DeliveryState::Rejected => self.rejected += 1,
            DeliveryState::Received => {}
        }
    }

    pub fn settled(&self) -> u64 {
        self.confirmed + self.requeued + self.rejected
    }
}

/// Pulls one delivery at a time and runs it through the pipeline.
///
/// `shutdown` is only polled while waiting for the next delivery; a delivery
/// that has been pulled is always settled before the loop checks it again.
/// The loop ends with `Ok` on shutdown and with `ConnectionError` when the
/// delivery stream fails, ends, or a settle call is refused by the broker.
pub async fn run_consume_loop<St, A, S, F>(
    deliveries: St,
    pipeline: &Pipeline<S>,
    shutdown: F,
) -> Result<LoopReport, ConnectionError>
where
    St: Stream<Item = Result<Incoming<A>, ConnectionError>>,
    A: Acknowledge,
    S: ObservationSink,
    F: Future<Output = ()>,
{
    tokio::pin!(deliveries);
    tokio::pin!(shutdown);
    let mut report = LoopReport::default();

    loop {
        let next = tokio::select! {
            biased;
            () = &mut shutdown => {
                info!(
                    confirmed = report.confirmed,
                    requeued = report.requeued,
                    rejected = report.rejected,
                    "shutdown requested; consume loop stopped"
                );
                return Ok(report);
            }
            next = deliveries.next() => next,
        };

        let incoming = match next {
            Some(Ok(incoming)) => incoming,
            Some(Err(connection_error)) => {
                error!(error = %connection_error, "delivery stream failed");
                return Err(connection_error);
            }
            None => {
                error!("delivery stream ended");
                return Err(ConnectionError::StreamEnded);
            }
        };

        match pipeline.process(incoming).await {
            Ok(state) => report.record(state),
            Err(connection_error) => {
                error!(error = %connection_error, "could not settle delivery");
                return Err(connection_error);
            }
        }
    }
}
