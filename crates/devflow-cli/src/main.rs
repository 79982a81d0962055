mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{checkpoint::CheckpointArgs, navigate::NavigateArgs, resume::ResumeArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "devflow",
    about = "Pipeline state and recovery: checkpoint, navigate, and resume a staged project",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .devflow/ or .git/)
    #[arg(long, global = true, env = "DEVFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize devflow in the current project
    Init {
        /// Display name for the project (default: directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show progress and whether there is unfinished work
    Status {
        #[arg(long)]
        project: Option<String>,
    },

    /// Create, list, or roll back to checkpoints
    Checkpoint {
        /// Name for the new checkpoint
        #[arg(short, long, conflicts_with_all = ["list", "rollback"])]
        name: Option<String>,

        /// List checkpoints, newest first
        #[arg(short, long, conflicts_with = "rollback")]
        list: bool,

        /// Roll back to a checkpoint by name, id, or tag
        #[arg(short, long, value_name = "NAME")]
        rollback: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Pick a checkpoint and reset the working tree to it
    Rollback {
        /// Use the most recent checkpoint instead of prompting
        #[arg(long)]
        latest: bool,

        #[arg(long)]
        project: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Move between pipeline stages
    Navigate {
        /// Target stage: init, interview, design, plan, review, develop, complete
        #[arg(long)]
        stage: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Show where the project can move from here
        #[arg(long)]
        list: bool,

        /// Show every recorded stage move
        #[arg(long, conflicts_with_all = ["stage", "list"])]
        history: bool,

        /// Report what the move would preserve and regenerate without moving
        #[arg(long, requires = "stage")]
        dry_run: bool,
    },

    /// Continue work from the current state, a checkpoint, or a given stage
    Resume {
        /// Restore the working tree from this checkpoint (id, tag, or name)
        #[arg(long)]
        checkpoint: Option<String>,

        /// Reset in-progress work of the resulting stage
        #[arg(long)]
        restart_stage: bool,

        /// Set the stage directly, without transition checks
        #[arg(long)]
        stage: Option<String>,

        /// Model to use for subsequent work
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { name } => cmd::init::run(&root, name.as_deref()),
        Commands::Status { project } => cmd::status::run(&root, project.as_deref(), cli.json),
        Commands::Checkpoint {
            name,
            list,
            rollback,
            project,
            yes,
        } => cmd::checkpoint::run(
            &root,
            CheckpointArgs {
                name: name.as_deref(),
                list,
                rollback: rollback.as_deref(),
                project: project.as_deref(),
                yes,
            },
            cli.json,
        ),
        Commands::Rollback {
            latest,
            project,
            yes,
        } => cmd::rollback::run(&root, project.as_deref(), latest, yes, cli.json),
        Commands::Navigate {
            stage,
            project,
            list,
            history,
            dry_run,
        } => cmd::navigate::run(
            &root,
            NavigateArgs {
                stage: stage.as_deref(),
                project: project.as_deref(),
                list,
                history,
                dry_run,
            },
            cli.json,
        ),
        Commands::Resume {
            checkpoint,
            restart_stage,
            stage,
            model,
            project,
            yes,
        } => cmd::resume::run(
            &root,
            ResumeArgs {
                checkpoint: checkpoint.as_deref(),
                restart_stage,
                stage: stage.as_deref(),
                model: model.as_deref(),
                project: project.as_deref(),
                yes,
            },
            cli.json,
        ),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
