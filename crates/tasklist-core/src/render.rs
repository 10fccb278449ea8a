use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, writer, tasks))]
    pub fn write_task_table<W: Write>(&self, mut writer: W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(writer, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "ID".to_string(),
            "Done".to_string(),
            "Task".to_string(),
            "Updated".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for (position, task) in tasks.iter().enumerate() {
            let done = if task.completed { "[x]" } else { "[ ]" };
            let text = if task.completed {
                self.paint(&task.text, "2")
            } else {
                task.text.clone()
            };
            let updated = task
                .updated_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string();

            rows.push(vec![
                (position + 1).to_string(),
                self.paint(&task.id.to_string(), "33"),
                done.to_string(),
                text,
                updated,
            ]);
        }

        write_table(&mut writer, headers, rows)?;

        let remaining = tasks.iter().filter(|t| !t.completed).count();
        writeln!(writer)?;
        writeln!(
            writer,
            "{} task{}, {} remaining",
            tasks.len(),
            if tasks.len() == 1 { "" } else { "s" },
            remaining
        )?;
        Ok(())
    }

    pub fn print_task_table(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks)
    }

    pub fn print_json(&self, tasks: &[Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, tasks)?;
        writeln!(out)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = column_count.saturating_sub(1);
    let pad_line = |writer: &mut W, cells: &[String]| -> io::Result<()> {
        for (idx, cell) in cells.iter().enumerate() {
            if idx == last {
                write!(writer, "{cell}")?;
            } else {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                let padding = widths[idx].saturating_sub(visible);
                write!(writer, "{}{} ", cell, " ".repeat(padding))?;
            }
        }
        writeln!(writer)
    };

    pad_line(&mut writer, headers.as_slice())?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    pad_line(&mut writer, rule.as_slice())?;
    for row in &rows {
        pad_line(&mut writer, row.as_slice())?;
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
