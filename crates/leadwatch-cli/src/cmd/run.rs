use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::context::Ctx;

/// Poll loop, digest jobs and HTTP server until Ctrl-C.
///
/// Shutdown flips one watch channel: the poller stops before the next lead
/// or batch, the scheduler starts nothing new, and the server drains.
pub fn run(ctx: &Ctx, no_server: bool) -> anyhow::Result<()> {
    let (tx, rx) = watch::channel(false);
    let engine = ctx.engine(Some(rx.clone()))?;
    for w in engine.config().validate() {
        warn!(level = ?w.level, "{}", w.message);
    }
    let scheduler = engine.scheduler()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let jobs = tokio::spawn(scheduler.run(rx.clone()));

        let server = if no_server {
            None
        } else {
            let bind = engine.config().server.bind.clone();
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            let mut stop = rx.clone();
            let shutdown = async move {
                let _ = stop.wait_for(|v| *v).await;
            };
            Some(tokio::spawn(leadwatch_server::serve_on(
                engine.clone(),
                listener,
                shutdown,
            )))
        };

        info!("leadwatch running; press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("shutting down");
        let _ = tx.send(true);

        jobs.await.context("scheduler task panicked")?;
        if let Some(server) = server {
            server.await.context("server task panicked")??;
        }
        Ok::<(), anyhow::Error>(())
    })
}
