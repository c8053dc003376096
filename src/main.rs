use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;
use tokio::time::Sleep;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use estate_notify::{config, presentation, EventName, Identity, NotificationSession};

mod cli;

/// How long the watcher waits before starting over once the reconnection
/// policy has given up.
const RETRY_AFTER_GIVE_UP: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Export spans over OTLP only when a collector endpoint is configured.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "estate-notify"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "estate_notify=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(telemetry_layer)
        .init();

    let args = cli::Cli::parse();
    let mut cfg = config::load()?;
    if let Some(url) = args.api_url {
        url::Url::parse(&url).with_context(|| format!("--api-url '{}' is not a valid URL", url))?;
        cfg.api_url = url;
    }

    let result = match args.command {
        Some(cli::Commands::Watch {
            user_id,
            user_type,
            auto_read,
        }) => watch(cfg, Identity::new(user_id, user_type), auto_read).await,
        Some(cli::Commands::Config) | None => {
            println!("{}", serde_json::to_string_pretty(&config_summary(&cfg))?);
            Ok(())
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn config_summary(cfg: &config::Config) -> serde_json::Value {
    serde_json::json!({
        "api_url": cfg.api_url,
        "connect_timeout_ms": cfg.connection.connect_timeout_ms,
        "max_reconnect_attempts": cfg.connection.max_reconnect_attempts,
        "reconnect_delay_ms": cfg.connection.reconnect_delay_ms,
        "retention_secs": cfg.store.retention_secs,
    })
}

async fn watch(cfg: config::Config, identity: Identity, auto_read: bool) -> anyhow::Result<()> {
    let session = NotificationSession::open(&cfg, identity).await;
    eprintln!("{}", presentation::bell_title(session.is_connected()));

    let gave_up = Arc::new(Notify::new());
    let signal = gave_up.clone();
    let _give_up = session
        .connection()
        .subscribe(EventName::MaxReconnectAttemptsReached, move |_| {
            signal.notify_one();
            Ok(())
        });
    let _connected = session
        .connection()
        .subscribe(EventName::Connected, |_| {
            eprintln!("{}", presentation::bell_title(true));
            Ok(())
        });
    let _dropped = session
        .connection()
        .subscribe(EventName::Disconnected, |_| {
            eprintln!("{}", presentation::bell_title(false));
            Ok(())
        });

    let mut changes = session.subscribe();
    let mut seen: HashSet<String> = HashSet::new();
    let mut retry: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            _ = gave_up.notified(), if retry.is_none() => {
                let idle_secs = session
                    .connection()
                    .last_message_at()
                    .map(|at| at.elapsed().as_secs());
                tracing::warn!(
                    retry_in_secs = RETRY_AFTER_GIVE_UP.as_secs(),
                    ?idle_secs,
                    "push server unreachable, will retry"
                );
                retry = Some(Box::pin(tokio::time::sleep(RETRY_AFTER_GIVE_UP)));
            }
            _ = wait_for(&mut retry), if retry.is_some() => {
                retry = None;
                session.start().await;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = changes.borrow_and_update().clone();
                let now = chrono::Utc::now();
                let mut fresh = Vec::new();
                for n in snapshot.notifications.iter().rev() {
                    if seen.insert(n.id.clone()) {
                        println!("{}", presentation::render_line(n, now));
                        fresh.push(n.id.clone());
                    }
                }
                seen.retain(|id| snapshot.notifications.iter().any(|n| &n.id == id));
                if fresh.is_empty() {
                    continue;
                }
                if auto_read {
                    for id in &fresh {
                        session.activate(id);
                    }
                }
                let unread = session.unread_count();
                let badge = presentation::badge_label(unread).unwrap_or_default();
                println!(
                    "[{}] {}",
                    badge,
                    presentation::summary_line(unread, snapshot.notifications.len())
                );
            }
        }
    }

    Ok(())
}

async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}
