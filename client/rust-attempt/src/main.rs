use anyhow::Context;
use lms_attempt_client::{
    config::Config, models::notification::Notification, StompConnectionManager,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize OpenTelemetry tracer (optional, can be disabled)
    let _tracer = init_telemetry()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lms_attempt_client=debug,lms_notify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer())
        .init();

    tracing::info!("Starting LMS notification listener");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let manager = StompConnectionManager::new(config.stomp_settings());
    manager.open().await;

    let mut listeners = Vec::new();
    for topic in &config.notifications.topics {
        let topic_name = topic.clone();
        let listener = manager
            .subscribe_with(topic, move |payload| match Notification::from_payload(&payload) {
                Some(notification) => {
                    tracing::info!(topic = %topic_name, "{}", notification.summary());
                }
                None => {
                    tracing::warn!(topic = %topic_name, "Ignoring non-object notification payload");
                }
            })
            .await
            .with_context(|| format!("Failed to subscribe to {}", topic))?;
        listeners.push(listener);
    }

    tracing::info!(
        topics = config.notifications.topics.len(),
        "Listening for notifications, press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    manager.close().await;
    for listener in listeners {
        listener.abort();
    }

    shutdown_telemetry();
    Ok(())
}

fn init_telemetry() -> anyhow::Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
        .context("Failed to create OTLP exporter")?;

    let resource = Resource::builder_empty()
        .with_service_name("lms-notify")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("lms-notify");
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracer)
}

fn shutdown_telemetry() {
    tracing::info!("Shutting down OpenTelemetry");
}
