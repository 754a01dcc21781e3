//! `loom request` command - create, inspect and transition workflow requests

use clap::Subcommand;
use console::style;
use miette::{bail, Result};
use tabled::Tabled;

use crate::cli::helpers::{
    format_short_id, open_engine, parse_id, parse_json_arg, read_ids_from_stdin, require_actor,
    truncate_str,
};
use crate::cli::output::{print_list, print_record};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{EntityId, IdempotencyKey};
use crate::core::repository::RequestFilter;
use crate::core::workflow::{allowed_actions, Actor, NewRequest, SideEffect};
use crate::entities::request::{Action, Request, RequestStatus, RequestType};
use crate::entities::timeline::TimelineEntry;

#[derive(Subcommand, Debug)]
pub enum RequestCommands {
    /// Create a request
    New(NewArgs),

    /// Show a request with its item, order, batch and timeline
    Show(ShowArgs),

    /// List requests with filtering
    List(ListArgs),

    /// Show a request's audit trail
    Timeline(ShowArgs),

    /// Apply an action to one request
    Transition(TransitionArgs),

    /// Apply an action to several requests, all or nothing
    Batch(BatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Request type (pattern, cutting, sew, wash, qc, finishing, packing, move, recovery)
    #[arg(long = "type", short = 't')]
    pub request_type: RequestType,

    /// Item the request acts on
    #[arg(long)]
    pub item: Option<String>,

    #[arg(long)]
    pub order: Option<String>,

    #[arg(long)]
    pub batch: Option<String>,

    /// Operator to assign
    #[arg(long, short = 'a')]
    pub assign: Option<String>,

    /// Stage metadata as JSON (or @file)
    #[arg(long, short = 'm')]
    pub metadata: Option<String>,

    /// Idempotency key; repeating a create with the same key returns the first request
    #[arg(long, conflicts_with = "dedupe")]
    pub key: Option<String>,

    /// Derive the idempotency key from the request content
    #[arg(long)]
    pub dedupe: bool,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[arg(long = "type", short = 't')]
    pub request_type: Option<RequestType>,

    #[arg(long, short = 's')]
    pub status: Option<RequestStatus>,

    /// Filter by assignee
    #[arg(long, short = 'a')]
    pub assigned: Option<String>,

    #[arg(long)]
    pub item: Option<String>,

    #[arg(long)]
    pub batch: Option<String>,

    /// Limit output to N requests
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    /// Show count only
    #[arg(long)]
    pub count: bool,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    pub id: String,

    /// assign, start, complete, fail, validate-item, record-defects, record-measurements
    pub action: Action,

    /// Action payload as JSON (or @file)
    #[arg(long, short = 'p')]
    pub payload: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    pub action: Action,

    /// Request ids (read from stdin when omitted)
    pub ids: Vec<String>,

    /// Action payload as JSON (or @file), applied to every request
    #[arg(long, short = 'p')]
    pub payload: Option<String>,
}

#[derive(Tabled)]
struct RequestRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TYPE")]
    request_type: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "ASSIGNED")]
    assigned: String,
    #[tabled(rename = "ITEM")]
    item: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

fn request_row(r: &Request) -> RequestRow {
    RequestRow {
        id: format_short_id(&r.id),
        request_type: r.request_type.to_string(),
        status: r.status.to_string(),
        assigned: r.assigned_to.as_deref().map(|a| truncate_str(a, 16)).unwrap_or_default(),
        item: r.item_id.as_ref().map(format_short_id).unwrap_or_default(),
        created: r.created_at.format("%Y-%m-%d %H:%M").to_string(),
    }
}

#[derive(Tabled)]
struct TimelineRow {
    #[tabled(rename = "WHEN")]
    when: String,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "OPERATOR")]
    operator: String,
}

fn timeline_row(e: &TimelineEntry) -> TimelineRow {
    TimelineRow {
        when: e.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        step: e.step.clone(),
        status: e.status.to_string(),
        operator: e.operator.clone().unwrap_or_default(),
    }
}

pub fn run(cmd: RequestCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        RequestCommands::New(args) => run_new(args, global),
        RequestCommands::Show(args) => run_show(args, global),
        RequestCommands::List(args) => run_list(args, global),
        RequestCommands::Timeline(args) => run_timeline(args, global),
        RequestCommands::Transition(args) => run_transition(args, global),
        RequestCommands::Batch(args) => run_batch(args, global),
    }
}

fn optional_id(s: Option<&str>) -> Result<Option<EntityId>> {
    s.map(parse_id).transpose()
}

fn run_new(args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let mut new = NewRequest::new(args.request_type);
    new.item_id = optional_id(args.item.as_deref())?;
    new.order_id = optional_id(args.order.as_deref())?;
    new.batch_id = optional_id(args.batch.as_deref())?;
    new.assigned_to = args.assign;
    new.metadata = parse_json_arg(args.metadata.as_deref())?;
    new.idempotency_key = match (args.key, args.dedupe) {
        (Some(key), _) => Some(
            IdempotencyKey::new(key).ok_or_else(|| miette::miette!("idempotency key is empty"))?,
        ),
        (None, true) => Some(new.intent_key()),
        (None, false) => None,
    };

    let engine = open_engine()?;
    let actor = global.actor.as_deref().map(Actor::new).transpose()?;
    let outcome = engine.create_request(new, actor.as_ref())?;

    match global.output {
        OutputFormat::Id => println!("{}", outcome.request.id),
        OutputFormat::Auto => {
            let verb = if outcome.side_effects.is_empty() {
                "Found existing"
            } else {
                "Created"
            };
            println!(
                "{} {} {} request {}",
                style("✓").green(),
                verb,
                outcome.request.request_type,
                style(outcome.request.id).cyan()
            );
        }
        format => print_record(format, &outcome)?,
    }
    Ok(())
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let details = engine.get_request(&parse_id(&args.id)?)?;
    if global.output != OutputFormat::Auto {
        return match global.output {
            OutputFormat::Id => {
                println!("{}", details.request.id);
                Ok(())
            }
            format => print_record(format, &details),
        };
    }

    let r = &details.request;
    println!("{}", style("─".repeat(60)).dim());
    println!("{}: {}", style("ID").bold(), style(r.id).cyan());
    println!("{}: {}", style("Type").bold(), r.request_type);
    println!("{}: {}", style("Status").bold(), style(r.status).yellow());
    if let Some(assignee) = &r.assigned_to {
        println!("{}: {}", style("Assigned").bold(), assignee);
    }
    if let Some(item) = &details.item {
        println!(
            "{}: {} {} [{} / {}]",
            style("Item").bold(),
            item.qr_code,
            style(&item.sku).dim(),
            item.status1,
            item.status2
        );
    }
    if let Some(order) = &details.order {
        println!("{}: {}", style("Order").bold(), order.order_number);
    }
    if let Some(batch) = &details.batch {
        println!(
            "{}: {} ({} x {}, {})",
            style("Batch").bold(),
            format_short_id(&batch.id),
            batch.quantity,
            batch.sku,
            batch.status
        );
    }
    let next: Vec<String> = allowed_actions(r.request_type, r.status)
        .iter()
        .map(|a| a.to_string())
        .collect();
    if !next.is_empty() {
        println!("{}: {}", style("Next").bold(), next.join(", "));
    }
    println!("{}", style("─".repeat(60)).dim());
    for entry in &details.timeline {
        println!(
            "  {} {:<22} {:<12} {}",
            style(entry.created_at.format("%Y-%m-%d %H:%M")).dim(),
            entry.step,
            entry.status,
            entry.operator.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let filter = RequestFilter {
        request_type: args.request_type,
        status: args.status,
        assigned_to: args.assigned,
        item_id: optional_id(args.item.as_deref())?,
        batch_id: optional_id(args.batch.as_deref())?,
        limit: args.limit,
    };
    let engine = open_engine()?;
    let requests = engine.list_requests(&filter)?;

    if args.count {
        println!("{}", requests.len());
        return Ok(());
    }
    if requests.is_empty() && global.output == OutputFormat::Auto {
        println!("No requests found.");
        return Ok(());
    }
    print_list(global.output, &requests, request_row, |r| r.id.to_string())
}

fn run_timeline(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine()?;
    let entries = engine.timeline(&parse_id(&args.id)?)?;
    print_list(global.output, &entries, timeline_row, |e| e.id.to_string())
}

fn print_side_effects(side_effects: &[SideEffect]) {
    for fx in side_effects {
        match fx {
            SideEffect::RequestSpawned {
                request_id,
                request_type,
                ..
            } => println!("   {} spawned {} {}", style("→").cyan(), request_type, request_id),
            SideEffect::ItemCreated { item_id, qr_code } => {
                println!("   {} item {} ({})", style("+").green(), qr_code, item_id)
            }
            SideEffect::ItemMoved {
                item_id, to_bin_id, ..
            } => println!(
                "   {} item {} moved to {}",
                style("→").cyan(),
                format_short_id(item_id),
                to_bin_id.as_ref().map(format_short_id).unwrap_or_else(|| "-".to_string())
            ),
            SideEffect::SkuRewritten { from, to, .. } => {
                println!("   {} sku {} → {}", style("~").yellow(), from, to)
            }
            SideEffect::NotificationFailed { error, .. } => {
                println!("   {} notification not sent: {}", style("!").yellow(), error)
            }
            _ => {}
        }
    }
}

fn run_transition(args: TransitionArgs, global: &GlobalOpts) -> Result<()> {
    let actor = require_actor(global)?;
    let payload = parse_json_arg(args.payload.as_deref())?;
    let engine = open_engine()?;
    let outcome = engine.transition(&parse_id(&args.id)?, args.action, &actor, &payload)?;

    match global.output {
        OutputFormat::Id => {
            for id in outcome.spawned() {
                println!("{}", id);
            }
        }
        OutputFormat::Auto => {
            println!(
                "{} {} {} {} → {}",
                style("✓").green(),
                args.action,
                outcome.request.request_type,
                style(outcome.request.id).cyan(),
                style(outcome.request.status).yellow()
            );
            print_side_effects(&outcome.side_effects);
        }
        format => print_record(format, &outcome)?,
    }
    Ok(())
}

fn run_batch(args: BatchArgs, global: &GlobalOpts) -> Result<()> {
    let actor = require_actor(global)?;
    let raw_ids = if args.ids.is_empty() {
        read_ids_from_stdin().unwrap_or_default()
    } else {
        args.ids
    };
    if raw_ids.is_empty() {
        bail!("no request ids given");
    }
    let ids = raw_ids
        .iter()
        .map(|s| parse_id(s))
        .collect::<Result<Vec<_>>>()?;
    let payload = parse_json_arg(args.payload.as_deref())?;

    let engine = open_engine()?;
    let outcome = engine.batch_transition(&ids, args.action, &actor, &payload)?;

    match global.output {
        OutputFormat::Id => {
            for id in outcome.spawned() {
                println!("{}", id);
            }
        }
        OutputFormat::Auto => {
            println!(
                "{} {} applied to {} request(s)",
                style("✓").green(),
                args.action,
                style(outcome.requests.len()).cyan()
            );
            print_side_effects(&outcome.side_effects);
        }
        format => print_record(format, &outcome)?,
    }
    Ok(())
}
