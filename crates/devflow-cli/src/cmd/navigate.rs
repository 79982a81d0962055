use super::Context;
use crate::output::{print_json, print_section, print_table};
use anyhow::Context as _;
use devflow_core::{navigator::StageNavigator, types::Stage};
use std::path::Path;

pub struct NavigateArgs<'a> {
    pub stage: Option<&'a str>,
    pub project: Option<&'a str>,
    pub list: bool,
    pub history: bool,
    pub dry_run: bool,
}

pub fn run(root: &Path, args: NavigateArgs<'_>, json: bool) -> anyhow::Result<()> {
    let ctx = Context::open(root)?;
    let project_id = ctx.project_id(args.project);
    let navigator = StageNavigator::new(&ctx.store, ctx.snapshots(), &ctx.config.navigation);

    if args.history {
        return history(&navigator, &project_id, json);
    }

    let target = match args.stage {
        Some(s) if !args.list => s.parse::<Stage>()?,
        _ => return options(&navigator, &project_id, json),
    };

    let result = if args.dry_run {
        navigator
            .preview(&project_id, target)
            .with_context(|| format!("cannot navigate to {target}"))?
    } else {
        navigator
            .navigate_to_stage(&project_id, target)
            .with_context(|| format!("failed to navigate to {target}"))?
    };

    if json {
        return print_json(&result);
    }
    let verb = if args.dry_run { "Would move" } else { "Moved" };
    println!("{verb} {} -> {}", result.from_stage, result.to_stage);
    print_section("Preserved", &result.preserved_work);
    print_section("Needs regeneration", &result.regenerated_artifacts);
    if let Some(id) = &result.checkpoint_id {
        println!("Checkpoint taken before moving back: {id}");
    }
    println!("\nNext: {}", result.next_action);
    Ok(())
}

fn options(navigator: &StageNavigator<'_>, project_id: &str, json: bool) -> anyhow::Result<()> {
    let opts = navigator
        .navigation_options(project_id)
        .with_context(|| format!("failed to load project '{project_id}'"))?;
    if json {
        return print_json(&opts);
    }
    println!("Current stage: {}", opts.current_stage);
    match opts.next_stage {
        Some(next) => println!("Forward:       {next}"),
        None => println!("Forward:       (none)"),
    }
    if opts.can_go_back.is_empty() {
        println!("Back:          (none)");
    } else {
        let back: Vec<&str> = opts.can_go_back.iter().map(|s| s.as_str()).collect();
        println!("Back:          {}", back.join(", "));
    }
    Ok(())
}

fn history(navigator: &StageNavigator<'_>, project_id: &str, json: bool) -> anyhow::Result<()> {
    let records = navigator
        .navigation_history(project_id)
        .context("failed to read navigation history")?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No navigation recorded.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.from_stage.to_string(),
                r.to_stage.to_string(),
                if r.forced { "yes".into() } else { String::new() },
            ]
        })
        .collect();
    print_table(&["WHEN", "FROM", "TO", "FORCED"], rows);
    let iterations = navigator
        .iteration_count(project_id)
        .context("failed to read navigation history")?;
    println!("\n{iterations} backward move(s)");
    Ok(())
}
