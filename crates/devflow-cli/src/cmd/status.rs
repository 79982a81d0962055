use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use devflow_core::{navigator::StageNavigator, resume::ResumeController};
use std::path::Path;

pub fn run(root: &Path, project: Option<&str>, json: bool) -> anyhow::Result<()> {
    let ctx = Context::open(root)?;
    let project_id = ctx.project_id(project);
    let controller = ResumeController::new(&ctx.store, ctx.snapshots(), &ctx.config.navigation);
    let work = controller
        .detect_incomplete_work(&project_id)
        .with_context(|| format!("failed to inspect project '{project_id}'"))?;

    if json {
        return print_json(&work);
    }

    println!("{}", work.summary);

    let navigator = StageNavigator::new(&ctx.store, ctx.snapshots(), &ctx.config.navigation);
    let iterations = navigator
        .iteration_count(&project_id)
        .context("failed to read navigation history")?;
    if iterations > 0 {
        println!("Iterations: {iterations} backward move(s)");
    }

    if work.has_incomplete_work {
        println!("\nRun 'devflow resume' to continue.");
    }
    Ok(())
}
