//! `loom bin` command - storage bin management

use clap::Subcommand;
use console::style;
use miette::Result;
use tabled::Tabled;

use crate::cli::helpers::{format_short_id, open_engine};
use crate::cli::output::{print_list, print_record};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::entities::bin::Bin;

#[derive(Subcommand, Debug)]
pub enum BinCommands {
    /// Add a bin
    Add(AddArgs),

    /// List bins with occupancy
    List,

    /// Take a bin out of service
    Deactivate(KeyArgs),

    /// Return a bin to service
    Activate(KeyArgs),
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Floor label, e.g. A-01-03
    pub code: String,

    /// Maximum number of items
    #[arg(long, short = 'c')]
    pub capacity: u32,

    /// Only accept items with exactly this SKU
    #[arg(long)]
    pub sku: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct KeyArgs {
    /// Bin id or code
    pub bin: String,
}

#[derive(Tabled)]
struct BinRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "CODE")]
    code: String,
    #[tabled(rename = "USED")]
    used: String,
    #[tabled(rename = "SKU")]
    sku: String,
    #[tabled(rename = "ACTIVE")]
    active: String,
}

fn bin_row(bin: &Bin) -> BinRow {
    BinRow {
        id: format_short_id(&bin.id),
        code: bin.code.clone(),
        used: format!("{}/{}", bin.current_count, bin.capacity),
        sku: bin.sku_restriction.clone().unwrap_or_else(|| "-".to_string()),
        active: if bin.active { "yes" } else { "no" }.to_string(),
    }
}

pub fn run(cmd: BinCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        BinCommands::Add(args) => run_add(args, global),
        BinCommands::List => run_list(global),
        BinCommands::Deactivate(args) => run_set_active(args, false, global),
        BinCommands::Activate(args) => run_set_active(args, true, global),
    }
}

fn run_add(args: AddArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let mut bin = Bin::new(args.code.trim(), args.capacity);
    bin.sku_restriction = args.sku;
    let bin = engine.add_bin(bin)?;

    match global.output {
        OutputFormat::Id => println!("{}", bin.id),
        OutputFormat::Auto => println!(
            "{} Added bin {} ({})",
            style("✓").green(),
            style(&bin.code).cyan(),
            bin.id
        ),
        format => print_record(format, &bin)?,
    }
    Ok(())
}

fn run_list(global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let bins = engine.list_bins()?;
    if bins.is_empty() && global.output == OutputFormat::Auto {
        println!("No bins found.");
        println!();
        println!("Add one with: {}", style("loom bin add <CODE> --capacity N").yellow());
        return Ok(());
    }
    print_list(global.output, &bins, bin_row, |b| b.id.to_string())
}

fn run_set_active(args: KeyArgs, active: bool, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let bin = engine.set_bin_active(&args.bin, active)?;
    match global.output {
        OutputFormat::Auto => println!(
            "{} Bin {} is now {}",
            style("✓").green(),
            style(&bin.code).cyan(),
            if active { "active" } else { "inactive" }
        ),
        format => print_record(format, &bin)?,
    }
    Ok(())
}
