//! `loom init` command - create a project

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use crate::core::project::Project;

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Rewrite the config of an existing project
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> Result<()> {
    let root = match args.path {
        Some(path) => path,
        None => std::env::current_dir().into_diagnostic()?,
    };
    let project = Project::init_with(&root, args.force)?;

    println!(
        "{} Initialized loom project in {}",
        style("✓").green(),
        style(project.root().display()).cyan()
    );
    println!("   {}", style(project.config_path().display()).dim());
    println!();
    println!(
        "Set {} in the config before completing WASH requests.",
        style("workflow.wash_staging_bin").yellow()
    );
    Ok(())
}
