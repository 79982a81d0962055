use super::{cancelled, confirm, Context};
use crate::output::{print_json, print_notice, print_section, print_table, section_lines, short_id};
use anyhow::Context as _;
use chrono::Utc;
use devflow_core::checkpoint::{Checkpoint, CheckpointManager, RollbackPreview};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub struct CheckpointArgs<'a> {
    pub name: Option<&'a str>,
    pub list: bool,
    pub rollback: Option<&'a str>,
    pub project: Option<&'a str>,
    pub yes: bool,
}

pub fn run(root: &Path, args: CheckpointArgs<'_>, json: bool) -> anyhow::Result<()> {
    let ctx = Context::open(root)?;
    let project_id = ctx.project_id(args.project);

    if args.list {
        let manager = CheckpointManager::new(&ctx.store, ctx.snapshots());
        let checkpoints = manager
            .list_checkpoints(&project_id)
            .context("failed to list checkpoints")?;
        list(&checkpoints, json)?;
        if !json {
            report_orphans(&manager);
        }
        return Ok(());
    }

    let manager = CheckpointManager::new(&ctx.store, ctx.require_snapshots()?);

    if let Some(reference) = args.rollback {
        let checkpoint = manager
            .find_by_reference(&project_id, reference)
            .with_context(|| format!("failed to find checkpoint '{reference}'"))?;
        let preview = manager
            .rollback_preview(&checkpoint.id)
            .context("failed to prepare rollback")?;
        print_preview(&preview, json);
        if !confirm("Roll back the working tree?", args.yes)? {
            return cancelled("Rollback", json);
        }
        let restored = manager
            .rollback(&checkpoint.id)
            .context("failed to roll back")?;
        if json {
            return print_json(&restored);
        }
        println!("Rolled back to '{}' ({})", restored.name, restored.vcs_tag);
        return Ok(());
    }

    let name = args
        .name
        .map(str::to_string)
        .unwrap_or_else(|| format!("manual-{}", Utc::now().format("%Y%m%d-%H%M%S")));
    let stage = ctx
        .store
        .get_project(&project_id)
        .with_context(|| format!("failed to load project '{project_id}'"))?
        .current_stage;
    let metadata = BTreeMap::from([("stage".to_string(), stage.to_string())]);
    let checkpoint = manager
        .create_checkpoint(&project_id, &name, metadata)
        .context("failed to create checkpoint")?;

    if json {
        return print_json(&checkpoint);
    }
    println!("Created checkpoint '{}'", checkpoint.name);
    println!("  id:  {}", checkpoint.id);
    println!("  tag: {}", checkpoint.vcs_tag);
    Ok(())
}

fn list(checkpoints: &[Checkpoint], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&checkpoints);
    }
    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }
    let rows = checkpoints
        .iter()
        .rev()
        .map(|c| {
            vec![
                short_id(&c.id).to_string(),
                c.name.clone(),
                c.kind().to_string(),
                c.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                c.vcs_tag.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "TYPE", "CREATED", "TAG"], rows);
    Ok(())
}

/// Tags left behind by a checkpoint whose record was never written.
fn report_orphans(manager: &CheckpointManager<'_>) {
    match manager.orphaned_tags() {
        Ok(tags) if !tags.is_empty() => {
            println!();
            print_section("Tags with no checkpoint record", &tags);
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, "skipped orphaned tag check"),
    }
}

/// What a rollback loses and keeps. Goes to stderr under `--json`.
pub fn print_preview(preview: &RollbackPreview, json: bool) {
    print_notice(&preview_lines(preview), json);
}

fn preview_lines(preview: &RollbackPreview) -> Vec<String> {
    let cp = &preview.checkpoint;
    let mut lines = vec![format!(
        "Checkpoint '{}' from {}",
        cp.name,
        cp.created_at.format("%Y-%m-%d %H:%M:%S")
    )];
    let lost = preview.lost();
    if lost.is_empty() {
        lines.push("Nothing in the working tree differs from this checkpoint.".to_string());
    }
    lines.extend(section_lines("Will be lost", &lost));
    lines.extend(section_lines("Will be preserved", &preview.preserved));
    lines
}
