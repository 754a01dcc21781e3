//! `loom item` command - inventory items

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::open_engine;
use crate::cli::output::print_record;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::sku::Sku;

#[derive(Subcommand, Debug)]
pub enum ItemCommands {
    /// Register a finished garment as available stock
    Add(AddArgs),

    /// Show an item by id or QR code
    Show(ShowArgs),
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Five-segment SKU: STYLE-WAIST-SHAPE-LENGTH-WASH
    pub sku: String,

    /// QR label printed on the garment
    #[arg(long)]
    pub qr: String,

    /// Bin id or code to place the item in
    #[arg(long, short = 'b')]
    pub bin: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Item id or QR code
    pub item: String,
}

pub fn run(cmd: ItemCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        ItemCommands::Add(args) => run_add(args, global),
        ItemCommands::Show(args) => run_show(args, global),
    }
}

fn run_add(args: AddArgs, global: &GlobalOpts) -> Result<()> {
    let sku: Sku = args
        .sku
        .parse()
        .map_err(|e| miette::miette!("invalid SKU '{}': {}", args.sku, e))?;
    let engine = open_engine()?;
    let item = engine.register_item(sku, &args.qr, args.bin.as_deref())?;

    match global.output {
        OutputFormat::Id => println!("{}", item.id),
        OutputFormat::Auto => {
            println!(
                "{} Registered item {} ({})",
                style("✓").green(),
                style(&item.qr_code).cyan(),
                item.id
            );
            println!("   {}", style(&item.sku).dim());
        }
        format => print_record(format, &item)?,
    }
    Ok(())
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let item = engine.get_item(args.item.trim())?;
    match global.output {
        OutputFormat::Id => println!("{}", item.id),
        format => print_record(format, &item)?,
    }
    Ok(())
}
