//! `loom order` command - customer orders

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::open_engine;
use crate::cli::output::print_record;
use crate::cli::{GlobalOpts, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum OrderCommands {
    /// Record a customer order
    Add(AddArgs),
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// External order number
    pub order_number: String,
}

pub fn run(cmd: OrderCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        OrderCommands::Add(args) => {
            let engine = open_engine()?;
            let order = engine.add_order(&args.order_number)?;
            match global.output {
                OutputFormat::Id => println!("{}", order.id),
                OutputFormat::Auto => println!(
                    "{} Added order {} ({})",
                    style("✓").green(),
                    style(&order.order_number).cyan(),
                    order.id
                ),
                format => print_record(format, &order)?,
            }
            Ok(())
        }
    }
}
