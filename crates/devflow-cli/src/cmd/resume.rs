use super::checkpoint::print_preview;
use super::{cancelled, confirm, Context};
use crate::output::{print_json, print_notice, print_section, section_lines};
use anyhow::Context as _;
use devflow_core::{
    checkpoint::CheckpointManager,
    resume::{ResumeController, ResumeOptions},
    types::Stage,
};
use std::path::Path;

pub struct ResumeArgs<'a> {
    pub checkpoint: Option<&'a str>,
    pub restart_stage: bool,
    pub stage: Option<&'a str>,
    pub model: Option<&'a str>,
    pub project: Option<&'a str>,
    pub yes: bool,
}

pub fn run(root: &Path, args: ResumeArgs<'_>, json: bool) -> anyhow::Result<()> {
    let ctx = Context::open(root)?;
    let project_id = ctx.project_id(args.project);
    let stage = args.stage.map(str::parse::<Stage>).transpose()?;
    // Restoring a checkpoint needs git; everything else works without it.
    let snapshots = if args.checkpoint.is_some() {
        ctx.require_snapshots()?
    } else {
        ctx.snapshots()
    };
    let controller = ResumeController::new(&ctx.store, snapshots, &ctx.config.navigation);
    let manager = CheckpointManager::new(&ctx.store, snapshots);

    let project = ctx
        .store
        .get_project(&project_id)
        .with_context(|| format!("failed to load project '{project_id}'"))?;

    let mut destructive = false;

    let from_checkpoint = match args.checkpoint {
        Some(reference) => {
            let checkpoint = manager
                .find_by_reference(&project_id, reference)
                .with_context(|| format!("failed to find checkpoint '{reference}'"))?;
            let preview = manager
                .rollback_preview(&checkpoint.id)
                .context("failed to prepare rollback")?;
            print_preview(&preview, json);
            destructive = true;
            Some(checkpoint.id)
        }
        None => None,
    };

    if args.restart_stage {
        let target = stage.unwrap_or(project.current_stage);
        let preview = controller
            .restart_preview(&project_id, target)
            .context("failed to prepare restart")?;
        if preview.is_noop() {
            print_notice(
                &[format!("Restarting {target}: no in-progress work to reset.")],
                json,
            );
        } else {
            let phases: Vec<String> = preview
                .phases
                .iter()
                .map(|p| format!("phase {}: {}", p.number, p.title))
                .collect();
            let tasks: Vec<String> = preview.tasks.iter().map(|t| t.title.clone()).collect();
            let mut lines = section_lines("Phases reset to not started", &phases);
            lines.extend(section_lines("Tasks reset to not started", &tasks));
            lines.push("Completed and blocked work is kept.".to_string());
            print_notice(&lines, json);
            destructive = true;
        }
    }

    if destructive && !confirm("Continue?", args.yes)? {
        return cancelled("Resume", json);
    }

    let outcome = controller
        .resume(&ResumeOptions {
            project_id: project_id.clone(),
            from_checkpoint,
            restart_stage: args.restart_stage,
            stage,
            selected_model: args.model.map(str::to_string),
        })
        .with_context(|| format!("failed to resume project '{project_id}'"))?;

    if json {
        return print_json(&outcome);
    }

    println!("Resuming '{}' at stage {}", outcome.project_id, outcome.stage);
    if outcome.restored_from != devflow_core::resume::RESTORED_FROM_CURRENT {
        println!("  restored working tree from checkpoint {}", outcome.restored_from);
    }
    if outcome.restarted {
        println!(
            "  reset {} phase(s) and {} task(s)",
            outcome.reset_phases, outcome.reset_tasks
        );
    }
    if let Some(model) = &outcome.selected_model {
        println!("  model: {model}");
    }

    let context = controller.get_resume_context(&project_id, outcome.stage);
    if let Some(blockers) = context.blockers.filter(|b| !b.is_empty()) {
        let items: Vec<String> = blockers
            .iter()
            .map(|t| match &t.blocker {
                Some(reason) => format!("{} ({reason})", t.title),
                None => t.title.clone(),
            })
            .collect();
        print_section("Blocked", &items);
    }
    if let Some(tasks) = context.current_tasks.filter(|t| !t.is_empty()) {
        let items: Vec<String> = tasks
            .iter()
            .map(|t| format!("{} [{}]", t.title, t.status))
            .collect();
        print_section("Current phase tasks", &items);
    }

    println!("\nNext: {}", outcome.next_action);
    Ok(())
}
