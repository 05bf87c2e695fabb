use sequencer_core::{RunOutcome, RunReport};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

const REPORT_HEADERS: [&str; 5] = ["LIST", "OUTCOME", "PASSES", "COMMANDS", "ELAPSED"];

/// One aligned row per run, in the order the runs happened.
pub fn print_reports(reports: &[RunReport]) {
    let rows: Vec<[String; 5]> = reports
        .iter()
        .map(|r| {
            let outcome = match r.outcome {
                RunOutcome::Completed => "completed",
                RunOutcome::Cancelled => "cancelled",
            };
            let elapsed = (r.finished_at - r.started_at).num_milliseconds();
            [
                r.list.to_string(),
                outcome.to_string(),
                r.passes.to_string(),
                r.commands_run.to_string(),
                format!("{elapsed}ms"),
            ]
        })
        .collect();

    let mut widths = REPORT_HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(widths)
            .map(|(c, w)| format!("{c:w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    println!("{}", line(&REPORT_HEADERS.map(String::from)));
    for row in &rows {
        println!("{}", line(row));
    }
}
