use super::checkpoint::print_preview;
use super::{cancelled, confirm, Context};
use crate::output::print_json;
use anyhow::{bail, Context as _};
use devflow_core::{
    checkpoint::{Checkpoint, CheckpointManager},
    DevflowError,
};
use std::io::IsTerminal;
use std::path::Path;

pub fn run(
    root: &Path,
    project: Option<&str>,
    latest: bool,
    yes: bool,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = Context::open(root)?;
    let project_id = ctx.project_id(project);
    let manager = CheckpointManager::new(&ctx.store, ctx.require_snapshots()?);

    let chosen = if latest {
        manager
            .latest_checkpoint(&project_id)
            .context("failed to list checkpoints")?
            .ok_or_else(|| DevflowError::NoCheckpoints(project_id.clone()))?
    } else {
        let mut checkpoints = manager
            .list_checkpoints(&project_id)
            .context("failed to list checkpoints")?;
        if checkpoints.is_empty() {
            bail!("no checkpoints found for project '{project_id}'; create one with 'devflow checkpoint'");
        }
        // newest first
        checkpoints.reverse();
        select(checkpoints)?
    };

    let preview = manager
        .rollback_preview(&chosen.id)
        .context("failed to prepare rollback")?;
    print_preview(&preview, json);
    if !confirm("Roll back the working tree?", yes)? {
        return cancelled("Rollback", json);
    }

    let restored = if latest {
        manager.rollback_to_latest(&project_id)
    } else {
        manager.rollback(&chosen.id)
    }
    .context("failed to roll back")?;
    if json {
        return print_json(&restored);
    }
    println!("Rolled back to '{}' ({})", restored.name, restored.vcs_tag);
    println!("Project stage and task progress were left unchanged.");
    Ok(())
}

fn select(mut checkpoints: Vec<Checkpoint>) -> anyhow::Result<Checkpoint> {
    if !std::io::stdin().is_terminal() {
        bail!("no terminal to select a checkpoint; pass --latest or use 'devflow checkpoint --rollback <name>'");
    }
    let items: Vec<String> = checkpoints
        .iter()
        .map(|c| {
            format!(
                "{}  ({}, {})",
                c.name,
                c.created_at.format("%Y-%m-%d %H:%M:%S"),
                c.kind()
            )
        })
        .collect();
    let index = dialoguer::Select::new()
        .with_prompt("Select a checkpoint to roll back to")
        .items(&items)
        .default(0)
        .interact()
        .context("failed to read selection")?;
    Ok(checkpoints.swap_remove(index))
}
