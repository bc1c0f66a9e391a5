use std::sync::Arc;

use anyhow::Result;

use crate::context::{block_on, Ctx};
use crate::output::print_json;

/// One poll cycle, then exit.
pub fn run(ctx: &Ctx) -> Result<()> {
    let engine = ctx.engine(None)?;
    let poller = Arc::clone(engine.poller());
    let report = block_on(async move { poller.poll_once().await })??;

    let Some(report) = report else {
        // Only reachable if another cycle holds the guard in this process.
        println!("A poll cycle is already running.");
        return Ok(());
    };
    if ctx.json {
        return print_json(&report);
    }
    println!(
        "Fetched {} leads: {} need attention, {} changed ({} critical, {} normal)",
        report.fetched, report.attention, report.changed, report.critical, report.normal
    );
    println!(
        "Batches: {:?}  Actions created: {}  Workflow failures: {}",
        report.batches,
        report.actions_created.len(),
        report.workflows_failed
    );
    Ok(())
}
