use anyhow::Context;
use devflow_core::{
    config::{Config, WarnLevel},
    git::GitRepo,
    io, paths,
    store::Store,
    vcs::SnapshotStore,
};
use std::path::Path;

pub fn run(root: &Path, name: Option<&str>) -> anyhow::Result<()> {
    println!("Initializing devflow in: {}", root.display());

    let dir = paths::devflow_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config = if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to load config")?
    } else {
        let id = paths::project_id_from_root(root);
        let display_name = name.map(str::to_string).unwrap_or_else(|| id.clone());
        let cfg = Config::new(id, display_name);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    let store_existed = paths::store_path(root).exists();
    let store = Store::open(&paths::store_path(root)).context("failed to open project store")?;
    store
        .ensure_project(&config.project.id, &config.project.name)
        .context("failed to register project")?;
    println!(
        "  {} {}",
        if store_existed { "exists: " } else { "created:" },
        paths::STORE_FILE
    );

    io::ensure_gitignore_entry(root, paths::GITIGNORE_ENTRY)
        .context("failed to update .gitignore")?;

    for w in config.validate() {
        let label = match w.level {
            WarnLevel::Error => "error",
            WarnLevel::Warning => "warning",
        };
        println!("  {label}: {}", w.message);
    }

    match GitRepo::new(root, &config.vcs) {
        Ok(repo) if repo.is_repository() => {}
        Ok(_) => println!("\nnote: not a git repository; run 'git init' before creating checkpoints"),
        Err(e) => println!("\nnote: {e}; checkpoints and rollback are unavailable"),
    }

    println!("\nProject '{}' ready.", config.project.id);
    Ok(())
}
