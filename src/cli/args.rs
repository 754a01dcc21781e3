//! Top-level argument definitions

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::commands::{
    batch::BatchCommands, bin::BinCommands, init::InitArgs, item::ItemCommands,
    notify::NotifyCommands, order::OrderCommands, request::RequestCommands,
};

#[derive(Parser, Debug)]
#[command(name = "loom", version, about = "Garment production request workflow")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "auto")]
    pub output: OutputFormat,

    /// Operator performing the action
    #[arg(long, global = true, env = "LOOM_ACTOR")]
    pub actor: Option<String>,

    /// Log debug detail to stderr (LOOM_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table for lists, YAML for single records
    Auto,
    Yaml,
    Json,
    Table,
    /// Bare ids, one per line
    Id,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a loom project in the current directory
    Init(InitArgs),

    /// Storage bins
    #[command(subcommand)]
    Bin(BinCommands),

    /// Inventory items
    #[command(subcommand)]
    Item(ItemCommands),

    /// Customer orders
    #[command(subcommand)]
    Order(OrderCommands),

    /// Production batches
    #[command(subcommand)]
    Batch(BatchCommands),

    /// Workflow requests
    #[command(subcommand, visible_alias = "req")]
    Request(RequestCommands),

    /// Operator notifications
    #[command(subcommand)]
    Notify(NotifyCommands),
}
