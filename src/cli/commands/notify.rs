//! `loom notify` command - operator inbox

use clap::Subcommand;
use console::style;
use miette::Result;
use tabled::Tabled;

use crate::cli::helpers::{format_short_id, open_engine, parse_id, truncate_str};
use crate::cli::output::print_list;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::workflow::SideEffect;
use crate::entities::notification::Notification;

#[derive(Subcommand, Debug)]
pub enum NotifyCommands {
    /// List notifications for an operator
    List(ListArgs),

    /// Mark a notification as read
    Read(ReadArgs),

    /// Retry notifications that were never dispatched
    Dispatch,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Operator id (defaults to --actor)
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Only unread notifications
    #[arg(long)]
    pub unread: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReadArgs {
    pub id: String,
}

#[derive(Tabled)]
struct NotificationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "REQUEST")]
    request: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
    #[tabled(rename = "READ")]
    read: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

fn notification_row(n: &Notification) -> NotificationRow {
    NotificationRow {
        id: format_short_id(&n.id),
        request: format_short_id(&n.request_id),
        message: truncate_str(&n.message, 48),
        read: if n.read { "yes" } else { "" }.to_string(),
        created: n.created_at.format("%Y-%m-%d %H:%M").to_string(),
    }
}

pub fn run(cmd: NotifyCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        NotifyCommands::List(args) => run_list(args, global),
        NotifyCommands::Read(args) => run_read(args),
        NotifyCommands::Dispatch => run_dispatch(),
    }
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let user = args
        .user
        .or_else(|| global.actor.clone())
        .ok_or_else(|| miette::miette!("pass --user or --actor"))?;
    let engine = open_engine()?;
    let inbox = engine.notifications_for(&user, args.unread)?;
    if inbox.is_empty() && global.output == OutputFormat::Auto {
        println!("No notifications for {}.", style(&user).cyan());
        return Ok(());
    }
    print_list(global.output, &inbox, notification_row, |n| n.id.to_string())
}

fn run_read(args: ReadArgs) -> Result<()> {
    let engine = open_engine()?;
    let id = parse_id(&args.id)?;
    engine.mark_notification_read(&id)?;
    println!("{} Marked {} as read", style("✓").green(), style(id).cyan());
    Ok(())
}

fn run_dispatch() -> Result<()> {
    let engine = open_engine()?;
    let effects = engine.dispatch_pending()?;
    let failed = effects
        .iter()
        .filter(|fx| matches!(fx, SideEffect::NotificationFailed { .. }))
        .count();
    println!(
        "{} Dispatched {} notification(s), {} failed",
        style("✓").green(),
        effects.len() - failed,
        failed
    );
    Ok(())
}
