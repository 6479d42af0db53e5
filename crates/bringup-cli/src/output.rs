use std::time::Duration;

use bringup_core::outcome::Outcome;
use bringup_core::sequencer::SequenceResult;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<String>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(headers.iter().map(|h| h.to_string()).collect());
    out.push_str(&line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        out.push_str(&line(row.clone()));
    }
    out
}

pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn outcome_cell(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success => "succeeded".to_string(),
        Outcome::Failure(f) => format!("failed ({})", f.reason()),
    }
}

pub fn summary_rows(result: &SequenceResult) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = result
        .per_step
        .iter()
        .map(|r| vec![r.name.clone(), outcome_cell(&r.outcome), format_duration(r.duration)])
        .collect();
    rows.extend(
        result
            .skipped
            .iter()
            .map(|name| vec![name.clone(), "skipped".to_string(), "-".to_string()]),
    );
    rows.push(vec![
        "total".to_string(),
        outcome_cell(&result.overall),
        format_duration(result.duration),
    ]);
    rows
}

/// Print the end-of-run summary: a step table, or the full result as JSON.
pub fn print_summary(result: &SequenceResult, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(result);
    }
    println!();
    print_table(&["STEP", "OUTCOME", "DURATION"], summary_rows(result));
    Ok(())
}
