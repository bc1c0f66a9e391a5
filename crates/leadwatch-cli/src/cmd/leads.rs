use std::sync::Arc;

use anyhow::Result;

use leadwatch_core::workflow::render_status;

use crate::context::{block_on, Ctx};
use crate::output::{print_json, print_table};

/// Run the critical-lead workflow once and print the final state.
pub fn process(ctx: &Ctx, lead_id: u64) -> Result<()> {
    let engine = ctx.engine(None)?;
    let workflow = Arc::clone(engine.workflow());
    let outcome = block_on(async move { workflow.run(lead_id).await })??;

    if ctx.json {
        return print_json(&outcome);
    }
    println!(
        "{}",
        render_status(&outcome.state, engine.config().workflow.max_attempts)
    );
    let path: Vec<String> = outcome.visited.iter().map(|n| format!("{n:?}")).collect();
    println!("Path: {}", path.join(" -> "));
    Ok(())
}

/// Score one lead with its memory and history.
pub fn analyze(ctx: &Ctx, lead_id: u64) -> Result<()> {
    let engine = ctx.engine(None)?;
    let analyst = Arc::clone(engine.analyst());
    let result = block_on(async move { analyst.analyze(lead_id).await })??;

    if ctx.json {
        return print_json(&result);
    }
    let a = &result.assessment;
    println!("Lead #{lead_id}: {} ({}), priority {}", a.risk_score, a.risk_level, a.priority);
    if let Some(action) = &a.recommended_action {
        println!("Recommended: {action}");
    }
    println!("Reasoning: {}", a.reasoning);
    if let Some(thought) = &result.thought {
        println!("Thought: {thought}");
    }
    Ok(())
}

pub fn scores(ctx: &Ctx, lead_id: u64, limit: usize) -> Result<()> {
    let scores = ctx.store()?.recent_scores(lead_id, limit)?;
    if ctx.json {
        return print_json(&scores);
    }
    if scores.is_empty() {
        println!("No scores for lead {lead_id}.");
        return Ok(());
    }
    let rows = scores
        .iter()
        .map(|s| {
            vec![
                s.calculated_at.format("%Y-%m-%d %H:%M").to_string(),
                s.score.to_string(),
                s.risk_level.to_string(),
                s.priority.to_string(),
            ]
        })
        .collect();
    print_table(&["TIME", "SCORE", "LEVEL", "PRIORITY"], rows);
    Ok(())
}
