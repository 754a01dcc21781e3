use clap::Parser;
use miette::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use loomline::cli::{Cli, Commands};

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();

    // LOOM_LOG wins; otherwise warnings only, or debug with -v
    let default_level = if cli.global.verbose { "loomline=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOOM_LOG").unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let global = &cli.global;
    match cli.command {
        Commands::Init(args) => loomline::cli::commands::init::run(args),
        Commands::Bin(cmd) => loomline::cli::commands::bin::run(cmd, global),
        Commands::Item(cmd) => loomline::cli::commands::item::run(cmd, global),
        Commands::Order(cmd) => loomline::cli::commands::order::run(cmd, global),
        Commands::Batch(cmd) => loomline::cli::commands::batch::run(cmd, global),
        Commands::Request(cmd) => loomline::cli::commands::request::run(cmd, global),
        Commands::Notify(cmd) => loomline::cli::commands::notify::run(cmd, global),
    }
}
