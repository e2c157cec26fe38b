use futures::StreamExt;
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vmsingle_operator::{config::OperatorConfig, vmsingle_controller as vms};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("vmsingle-operator starting up");

    // A broken default cannot be fixed by retrying, refuse to start
    let config = OperatorConfig::from_env()?;
    let client = Client::try_default().await?;
    let shutdown = CancellationToken::new();

    let ctx = Arc::new(vms::Ctx {
        client: client.clone(),
        defaults: config.defaults.clone(),
        store_timeout: config.store_timeout,
        shutdown: shutdown.clone(),
    });
    let vms_controller = vms::controller(client, config.watch_namespace.as_deref())
        .run(vms::reconcile, vms::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "vmsingle reconcile error");
            }
        });

    tokio::select! {
        _ = vms_controller => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    }
    Ok(())
}
