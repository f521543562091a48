use anyhow::Result;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use sweepcrypt_core::{JobSnapshot, JobState};

/// Create a styled table for output
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table
}

/// Format a byte size into a human-readable string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.1}G", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1}M", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1}K", b as f64 / KB as f64),
        b => format!("{b}B"),
    }
}

/// "done/total" with a percentage when the estimate allows one.
///
/// Totals are advisory, so `done` may exceed `total`.
pub fn format_progress(done: u64, total: u64) -> String {
    if total == 0 {
        return done.to_string();
    }
    let percent = (done as f64 / total as f64 * 100.0).min(100.0);
    format!("{done}/{total} ({percent:.0}%)")
}

pub fn state_cell(state: JobState) -> Cell {
    Cell::new(state).fg(match state {
        JobState::Running => Color::Yellow,
        JobState::Done => Color::Green,
        JobState::Error => Color::Red,
    })
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print one job as a two-column table.
pub fn print_job(job: &JobSnapshot) {
    let mut table = create_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Job"), Cell::new(&job.id)]);
    table.add_row(vec![Cell::new("Mode"), Cell::new(job.mode)]);
    table.add_row(vec![Cell::new("Folder"), Cell::new(&job.folder)]);
    table.add_row(vec![Cell::new("State"), state_cell(job.state)]);
    table.add_row(vec![
        Cell::new("Files"),
        Cell::new(format_progress(job.done_files, job.total_files)),
    ]);
    table.add_row(vec![
        Cell::new("Bytes"),
        Cell::new(format!(
            "{} / {}",
            format_size(job.done_bytes),
            format_size(job.total_bytes)
        )),
    ]);
    table.add_row(vec![
        Cell::new("Updated"),
        Cell::new(job.updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
    ]);
    if let Some(error) = &job.error {
        table.add_row(vec![Cell::new("Error"), Cell::new(error).fg(Color::Red)]);
    }
    println!("{table}");
}
