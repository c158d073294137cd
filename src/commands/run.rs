//! `srcdst run` - the controller loop.

use anyhow::{Context as AnyhowContext, Result};
use log::info;
use srcdstkit::backend::NodeSource;
use srcdstkit::backend::ec2::{Ec2AttributeClient, Ec2Options};
use srcdstkit::backend::kubernetes::KubeInventory;
use srcdstkit::{Reconciler, RetryConfig, WatchDispatcher};
use std::time::Duration;

use crate::Context;
use crate::cli::RunArgs;
use crate::ui;

pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let inventory = KubeInventory::connect(
        runtime.handle().clone(),
        Duration::from_secs(args.resync_secs),
    )
    .context("Could not connect to the Kubernetes API")?;

    let ec2 = Ec2AttributeClient::connect(
        runtime.handle().clone(),
        &Ec2Options {
            region: args.region.clone(),
            operation_timeout: Some(Duration::from_secs(args.api_timeout_secs)),
        },
    )
    .context("Could not set up the EC2 client")?;

    let persist_retry = RetryConfig::new(
        args.persist_attempts,
        Duration::from_millis(args.persist_backoff_ms),
        2.0,
    );

    let subscription = inventory.watch().context("Could not start node watch")?;

    let closer = subscription.closer();
    runtime.spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, closing node watch");
        closer.close();
    });

    if !ctx.quiet {
        ui::header("srcdst controller");
        ui::kv("resync", &format!("{}s", args.resync_secs));
        ui::kv("persist attempts", &args.persist_attempts.to_string());
        ui::kv("api timeout", &format!("{}s", args.api_timeout_secs));
        println!();
    }

    let reconciler = Reconciler::new(&inventory, &ec2).with_persist_retry(persist_retry);
    let stats = WatchDispatcher::new(subscription, reconciler).run();

    if !ctx.quiet {
        ui::success(&format!("Stopped: {stats}"));
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
