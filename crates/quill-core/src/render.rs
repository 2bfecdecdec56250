use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::alert::{Alert, AlertKind};
use crate::config::Config;
use crate::datetime::{format_project_date, format_project_datetime, project_timezone};
use crate::store::{Bucket, Buckets};
use crate::task::Task;
use crate::timeline::Day;

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.color_enabled() && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn print_buckets(&self, buckets: &Buckets<'_>, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_buckets(io::stdout().lock(), buckets, now)
    }

    #[tracing::instrument(skip_all, fields(total = buckets.total()))]
    pub fn write_buckets<W: Write>(
        &self,
        mut out: W,
        buckets: &Buckets<'_>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if buckets.total() == 0 {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        for (bucket, tasks) in buckets.iter() {
            if tasks.is_empty() {
                continue;
            }
            writeln!(out, "{}", self.paint(bucket.label(), bucket_color(bucket)))?;

            let headers = vec![
                "ID".to_string(),
                "Due".to_string(),
                "Start".to_string(),
                "Title".to_string(),
            ];
            let rows = tasks
                .iter()
                .map(|task| {
                    let due = format_project_datetime(task.due);
                    let due = if task.is_overdue(now) {
                        self.paint(&due, "31")
                    } else {
                        due
                    };
                    vec![
                        self.paint(&short_id(task), "33"),
                        due,
                        task.start.map(format_project_datetime).unwrap_or_default(),
                        titled(task),
                    ]
                })
                .collect();

            write_table(&mut out, headers, rows)?;
            writeln!(out)?;
        }

        Ok(())
    }

    pub fn print_task_info(&self, task: &Task, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task, now)
    }

    #[tracing::instrument(skip_all, fields(id = %task.id))]
    pub fn write_task_info<W: Write>(
        &self,
        mut out: W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id           {}", task.id)?;
        writeln!(out, "title        {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "description  {}", task.description)?;
        }
        writeln!(out, "status       {}", Bucket::classify(task, now).label())?;
        writeln!(
            out,
            "complete     {}",
            if task.complete { "yes" } else { "no" }
        )?;
        if let Some(start) = task.start {
            writeln!(out, "start        {}", format_project_datetime(start))?;
        }
        writeln!(out, "due          {}", format_project_datetime(task.due))?;
        if let Some(done) = task.completed_at {
            writeln!(out, "completed    {}", format_project_datetime(done))?;
        }
        writeln!(out, "created      {}", format_project_datetime(task.created_at))?;
        Ok(())
    }

    pub fn print_calendar(&self, days: &[&Day]) -> anyhow::Result<()> {
        self.write_calendar(io::stdout().lock(), days)
    }

    #[tracing::instrument(skip_all, fields(days = days.len()))]
    pub fn write_calendar<W: Write>(&self, mut out: W, days: &[&Day]) -> anyhow::Result<()> {
        let tz = project_timezone();
        for day in days {
            let heading = day.date().format("%a %Y-%m-%d").to_string();
            writeln!(out, "{}", self.paint(&heading, "1"))?;
            if day.is_empty() {
                writeln!(out, "  -")?;
            }
            for task in day.due_tasks() {
                let at = task.due.with_timezone(tz).format("%H:%M");
                writeln!(out, "  {at}  {}  {}", titled(task), short_id(task))?;
            }
            for task in day.working_tasks() {
                writeln!(
                    out,
                    "  {}  {} (due {})",
                    self.paint("work ", "36"),
                    titled(task),
                    format_project_date(task.due)
                )?;
            }
        }
        Ok(())
    }

    pub fn print_alerts(&self, alerts: &[Alert]) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        for alert in alerts {
            let code = match alert.kind {
                AlertKind::Success => "32",
                AlertKind::Notice => "36",
                AlertKind::Error => "31",
            };
            writeln!(err, "{}", self.paint(&alert.body, code))?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn bucket_color(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Overdue => "1;31",
        Bucket::TodayDue => "1;33",
        Bucket::TodayWork => "1;36",
        Bucket::Upcoming => "1",
    }
}

fn short_id(task: &Task) -> String {
    task.id.simple().to_string()[..SHORT_ID_LEN].to_string()
}

fn titled(task: &Task) -> String {
    if task.complete {
        format!("[x] {}", task.title)
    } else {
        format!("[ ] {}", task.title)
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.width()).collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(strip_ansi(cell).width());
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let padding = width.saturating_sub(strip_ansi(cell).width());
            write!(writer, "{cell}{} ", " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
