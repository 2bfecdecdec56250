use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::alert::Notifier;
use crate::api::TaskApi;
use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{parse_date_expr, start_of_day};
use crate::interval::DateInterval;
use crate::render::Renderer;
use crate::store::TaskStore;
use crate::task::{TaskDraft, TaskPatch};
use crate::timeline::Timeline;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "next", "info", "done", "modify", "delete", "calendar", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv, now))]
pub fn dispatch<A, N>(
    store: &mut TaskStore<A, N>,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
    now: DateTime<Utc>,
) -> anyhow::Result<()>
where
    A: TaskApi,
    N: Notifier,
{
    let command = inv.command.as_str();
    debug!(command, task = ?inv.target, args = ?inv.args, "dispatching command");

    match command {
        "add" => cmd_add(store, &inv.args, now),
        "list" | "next" => cmd_list(store, renderer, command == "next", now),
        "info" => cmd_info(store, renderer, &inv, now),
        "done" => cmd_done(store, &inv, now),
        "modify" => cmd_modify(store, &inv, now),
        "delete" => cmd_delete(store, &inv),
        "calendar" => cmd_calendar(store, cfg, renderer, &inv.args, now),
        "help" => cmd_help(),
        "version" => cmd_version(),
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// `add <title words> [due:<when>] [start:<when>] [desc:<text>]`
#[instrument(skip(store, args, now))]
fn cmd_add<A: TaskApi, N: Notifier>(
    store: &mut TaskStore<A, N>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let fields = AddFields::split(args);
    let draft = TaskDraft::parse(
        &fields.title,
        fields.description.unwrap_or_default(),
        fields.start,
        fields.due,
        now,
    )?;
    let id = store.create(draft, now)?;
    println!("Created task {}.", id.simple());
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct AddFields<'a> {
    title: String,
    description: Option<&'a str>,
    start: Option<&'a str>,
    due: Option<&'a str>,
}

impl<'a> AddFields<'a> {
    fn split(args: &'a [String]) -> Self {
        let mut fields = Self::default();
        let mut words = Vec::new();
        for arg in args {
            match arg.split_once(':') {
                Some(("due", raw)) => fields.due = Some(raw),
                Some(("start", raw)) => fields.start = Some(raw),
                Some(("description" | "desc", raw)) => fields.description = Some(raw),
                _ => words.push(arg.as_str()),
            }
        }
        fields.title = words.join(" ");
        fields
    }
}

#[instrument(skip(store, renderer, now))]
fn cmd_list<A: TaskApi, N: Notifier>(
    store: &TaskStore<A, N>,
    renderer: &Renderer,
    only_actionable: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list/next");

    let mut buckets = store.by_status(now);
    if only_actionable {
        buckets.upcoming.clear();
        for group in [
            &mut buckets.overdue,
            &mut buckets.today_due,
            &mut buckets.today_work,
        ] {
            group.retain(|task| !task.complete);
        }
    }
    renderer.print_buckets(&buckets, now)
}

#[instrument(skip(store, renderer, inv, now))]
fn cmd_info<A: TaskApi, N: Notifier>(
    store: &mut TaskStore<A, N>,
    renderer: &Renderer,
    inv: &Invocation,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command info");

    let id = target_id(store, inv)?;
    store.set_focus(id)?;
    let task = store
        .focused()
        .ok_or_else(|| anyhow!("task {id} vanished"))?;
    renderer.print_task_info(task, now)
}

#[instrument(skip(store, inv, now))]
fn cmd_done<A: TaskApi, N: Notifier>(
    store: &mut TaskStore<A, N>,
    inv: &Invocation,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command done");

    let id = target_id(store, inv)?;
    let complete = store.toggle_complete(id, now)?;
    let verb = if complete { "Completed" } else { "Reopened" };
    println!("{verb} task {}.", id.simple());
    Ok(())
}

/// `<id> modify [title words] [due:<when>] [start:<when>|start:] [desc:<text>]`
#[instrument(skip(store, inv, now))]
fn cmd_modify<A: TaskApi, N: Notifier>(
    store: &mut TaskStore<A, N>,
    inv: &Invocation,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command modify");

    let (id, modifiers) = match &inv.target {
        Some(token) => (store.resolve(token)?, inv.args.as_slice()),
        None => {
            let (token, rest) = inv
                .args
                .split_first()
                .ok_or_else(|| anyhow!("modify needs a task id"))?;
            (store.resolve(token)?, rest)
        }
    };

    let patch = TaskPatch::parse_modifiers(modifiers, now)?;
    if patch.is_empty() {
        return Err(anyhow!("nothing to modify"));
    }
    store.edit(id, &patch)?;
    println!("Modified task {}.", id.simple());
    Ok(())
}

#[instrument(skip(store, inv))]
fn cmd_delete<A: TaskApi, N: Notifier>(
    store: &mut TaskStore<A, N>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command delete");

    let id = target_id(store, inv)?;
    store.delete(id)?;
    println!("Deleted task {}.", id.simple());
    Ok(())
}

/// `calendar [from]` shows `calendar.days` days starting at `from` (today
/// when omitted).
#[instrument(skip(store, cfg, renderer, args, now))]
fn cmd_calendar<A: TaskApi, N: Notifier>(
    store: &TaskStore<A, N>,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command calendar");

    let from = if args.is_empty() {
        now
    } else {
        parse_date_expr(&args.join(" "), now)
            .with_context(|| format!("invalid calendar start: {}", args.join(" ")))?
    };
    let days = cfg.calendar_days()?;
    let start = start_of_day(from);
    let window = DateInterval::new(start, start + Duration::days(days))
        .ok_or_else(|| anyhow!("calendar window ends before it starts"))?;

    let mut timeline = Timeline::new();
    let change = timeline.show(window, store.tasks())?;
    debug!(days = change.loaded.len(), "calendar window loaded");
    renderer.print_calendar(&timeline.window_days(&window))
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: quill [options] [id] <command> [args...]");
    println!();
    println!("commands:");
    println!("  add <title> [due:<when>] [start:<when>] [desc:<text>]");
    println!("  list                     all tasks by status");
    println!("  next                     open tasks that need attention today");
    println!("  <id> info                task details");
    println!("  <id> done                toggle completion");
    println!("  <id> modify <changes>    edit title, due, start or description");
    println!("  <id> delete              remove a task");
    println!("  calendar [from]          tasks per day");
    println!("  help | version");
    println!();
    println!("commands may be abbreviated to any unique prefix");
    Ok(())
}

fn cmd_version() -> anyhow::Result<()> {
    println!("quill {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn target_id<A: TaskApi, N: Notifier>(
    store: &TaskStore<A, N>,
    inv: &Invocation,
) -> anyhow::Result<Uuid> {
    let token = inv
        .target
        .as_deref()
        .or_else(|| inv.args.first().map(String::as_str))
        .ok_or_else(|| anyhow!("{} needs a task id", inv.command))?;
    Ok(store.resolve(token)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("cal", &known), Some("calendar"));
        assert_eq!(expand_command_abbrev("mod", &known), Some("modify"));
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("list", &known), Some("list"));
    }

    #[test]
    fn add_fields_separate_modifiers_from_title() {
        let args = words(&["Call", "mum", "due:tomorrow", "desc:birthday"]);
        let fields = AddFields::split(&args);
        assert_eq!(fields.title, "Call mum");
        assert_eq!(fields.due, Some("tomorrow"));
        assert_eq!(fields.description, Some("birthday"));
        assert_eq!(fields.start, None);
    }
}
