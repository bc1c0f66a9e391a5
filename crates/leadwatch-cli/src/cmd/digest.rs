use anyhow::Result;
use clap::ValueEnum;

use leadwatch_core::digest::DigestKind;

use crate::context::{block_on, Ctx};
use crate::output::print_json;

#[derive(Clone, Copy, ValueEnum)]
pub enum DigestArg {
    Morning,
    Evening,
    Weekly,
}

impl From<DigestArg> for DigestKind {
    fn from(d: DigestArg) -> Self {
        match d {
            DigestArg::Morning => DigestKind::Morning,
            DigestArg::Evening => DigestKind::Evening,
            DigestArg::Weekly => DigestKind::Weekly,
        }
    }
}

/// Render the digest, send it to the operator, and echo it.
pub fn run(ctx: &Ctx, kind: DigestArg) -> Result<()> {
    let engine = ctx.engine(None)?;
    let text = block_on(async move { engine.send_digest(kind.into()).await })??;
    if ctx.json {
        return print_json(&serde_json::json!({ "sent": true, "text": text }));
    }
    println!("{text}");
    Ok(())
}
