use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use weather_relay::config::Config;
use weather_relay::consumer::{RabbitConsumer, run_consume_loop};
use weather_relay::forwarder::Forwarder;
use weather_relay::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::from_env().context("load relay config")?;
    let forwarder = Forwarder::new(config.api_url.clone()).context("initialize forwarder")?;
    let consumer = RabbitConsumer::connect(&config)
        .await
        .context("initialize rabbitmq consumer")?;
    let deliveries = consumer.deliveries().await.context("start consuming")?;
    let pipeline = Pipeline::new(forwarder, config.failure_policy);

    info!(
        queue = %config.rabbit_queue,
        api_url = %pipeline.sink().endpoint_url(),
        on_decode_error = ?config.failure_policy.on_decode_error,
        on_forward_error = ?config.failure_policy.on_forward_error,
        "weather relay started; waiting for messages"
    );

    let report = run_consume_loop(deliveries, &pipeline, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("consume loop terminated")?;

    info!(
        settled = report.settled(),
        confirmed = report.confirmed,
        requeued = report.requeued,
        rejected = report.rejected,
        "weather relay stopped"
    );

    consumer.close().await
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
