//! `loom batch` command - production batches

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{open_engine, parse_id};
use crate::cli::output::print_record;
use crate::cli::{GlobalOpts, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum BatchCommands {
    /// Open a production batch
    Add(AddArgs),

    /// Show a batch and its aggregate status
    Show(ShowArgs),
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// SKU being produced
    pub sku: String,

    /// Units the batch should yield
    #[arg(long, short = 'q')]
    pub quantity: u32,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    pub id: String,
}

pub fn run(cmd: BatchCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        BatchCommands::Add(args) => run_add(args, global),
        BatchCommands::Show(args) => run_show(args, global),
    }
}

fn run_add(args: AddArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let batch = engine.add_batch(&args.sku, args.quantity)?;
    match global.output {
        OutputFormat::Id => println!("{}", batch.id),
        OutputFormat::Auto => println!(
            "{} Opened batch {} for {} x {}",
            style("✓").green(),
            style(batch.id).cyan(),
            batch.quantity,
            batch.sku
        ),
        format => print_record(format, &batch)?,
    }
    Ok(())
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let batch = engine.get_batch(&parse_id(&args.id)?)?;
    match global.output {
        OutputFormat::Id => println!("{}", batch.id),
        format => print_record(format, &batch)?,
    }
    Ok(())
}
