use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;

use leadwatch_core::action::{ActionStatus, Decision, PendingAction};

use crate::context::{block_on, Ctx};
use crate::output::{print_json, print_table};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ActionsSubcommand {
    /// List stored actions, newest first
    List {
        /// pending, executed, rejected, failed, snoozed or all
        #[arg(long, default_value = "pending")]
        status: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one action with its decision history
    Show { id: i64 },

    /// Execute a pending action against the CRM
    Approve { id: i64 },

    /// Reject a pending action (no CRM change)
    Reject { id: i64 },

    /// Snooze a pending action
    Snooze { id: i64 },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(ctx: &Ctx, subcmd: ActionsSubcommand) -> Result<()> {
    match subcmd {
        ActionsSubcommand::List { status, limit } => list(ctx, &status, limit),
        ActionsSubcommand::Show { id } => show(ctx, id),
        ActionsSubcommand::Approve { id } => approve(ctx, id),
        ActionsSubcommand::Reject { id } => transition(ctx, id, ActionStatus::Rejected),
        ActionsSubcommand::Snooze { id } => transition(ctx, id, ActionStatus::Snoozed),
    }
}

fn list(ctx: &Ctx, status: &str, limit: usize) -> Result<()> {
    let status = match status {
        "all" => None,
        s => Some(s.parse::<ActionStatus>()?),
    };
    let actions = ctx.store()?.list_actions(status, limit)?;

    if ctx.json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.lead_id.to_string(),
                a.action_type.clone(),
                a.risk_score.to_string(),
                a.priority.to_string(),
                a.status.to_string(),
                a.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "LEAD", "TYPE", "RISK", "PRIORITY", "STATUS", "CREATED"],
        rows,
    );
    Ok(())
}

fn show(ctx: &Ctx, id: i64) -> Result<()> {
    let store = ctx.store()?;
    let action = store.require_action(id)?;
    let decisions = store.decisions_for(id)?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "action": action,
            "decisions": decisions,
        }));
    }
    print_action(&action);
    println!("Data:      {}", action.action_data);
    println!("Reasoning: {}", action.reasoning);
    if !decisions.is_empty() {
        println!("\nDecisions:");
        for d in &decisions {
            println!(
                "  {}  {}{}",
                d.decided_at.format("%Y-%m-%d %H:%M"),
                d.decision,
                d.outcome.as_deref().map(|o| format!(" ({o})")).unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn approve(ctx: &Ctx, id: i64) -> Result<()> {
    let engine = ctx.engine(None)?;
    let desk = Arc::clone(engine.desk());
    let action = block_on(async move { desk.approve(id).await })??;
    report(ctx, &action)
}

/// Reject and snooze never touch the CRM, so they run on the store alone.
fn transition(ctx: &Ctx, id: i64, to: ActionStatus) -> Result<()> {
    let store = ctx.store()?;
    let action = store.transition_pending(id, to)?;
    if to == ActionStatus::Rejected {
        store.log_decision(id, Decision::Rejected, None, None)?;
    }
    report(ctx, &action)
}

fn report(ctx: &Ctx, action: &PendingAction) -> Result<()> {
    if ctx.json {
        return print_json(action);
    }
    print_action(action);
    Ok(())
}

fn print_action(a: &PendingAction) {
    println!("Action #{} ({})", a.id, a.status);
    println!("Lead:      {}", a.lead_id);
    println!("Type:      {}", a.action_type);
    println!("Risk:      {} ({})", a.risk_score, a.priority);
}
