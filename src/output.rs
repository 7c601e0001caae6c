use crate::models::{AggregateMetric, TotalResult};
use crate::registry::{CatalogEntry, Modality, Pricing};
use crate::runner::UnitReport;
use crate::subjects::{DATASET_NAME, Subject};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print per-unit results in the specified format
pub fn print_units(reports: &[UnitReport], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", format_units_plain(reports)),
        OutputFormat::Json => print_json(reports),
    }
}

/// Print split rollups in the specified format
pub fn print_totals(totals: &[TotalResult], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", format_totals_plain(totals)),
        OutputFormat::Json => print_json(totals),
    }
}

/// Print the files a command rewrote
pub fn print_paths(paths: &[PathBuf], format: OutputFormat) {
    match format {
        OutputFormat::Plain => {
            for path in paths {
                println!("Updated: {}", path.display());
            }
        }
        OutputFormat::Json => print_json(paths),
    }
}

/// Print the model catalog in the specified format
pub fn print_catalog(entries: &[CatalogEntry], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", format_catalog_plain(entries)),
        OutputFormat::Json => print_json(entries),
    }
}

/// Print the subject catalog in the specified format
pub fn print_subjects(subjects: &[Subject], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", format_subjects_plain(subjects)),
        OutputFormat::Json => print_json(subjects),
    }
}

fn format_subjects_plain(subjects: &[Subject]) -> String {
    let count = |n: Option<u32>| n.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    let mut out = format!(
        "Dataset: {}\n{:<28} {:<5} {:>5} {:>5} {:>5}  {}\n{}\n",
        DATASET_NAME,
        "Subject",
        "Abbr",
        "Dev",
        "Val",
        "Test",
        "Dimension",
        "-".repeat(80)
    );
    for subject in subjects {
        out.push_str(&format!(
            "{:<28} {:<5} {:>5} {:>5} {:>5}  {}\n",
            subject.name,
            subject.abbreviation,
            count(subject.dev),
            count(subject.val),
            count(subject.test),
            subject.dimension.map(|d| d.as_str()).unwrap_or("-")
        ));
        out.push_str(&format!("    {}\n", subject.description));
    }
    out
}

fn format_pricing(pricing: &Pricing) -> String {
    match pricing {
        Pricing::OpenSource => "open source".to_string(),
        Pricing::Paid { input, output, .. } => match (input, output) {
            (Some(input), Some(output)) => format!("${:.2} / ${:.2}", input, output),
            _ => "unpublished".to_string(),
        },
    }
}

fn format_catalog_plain(entries: &[CatalogEntry]) -> String {
    let mut out = format!(
        "{:<12} {:<28} {:<6} {:>9}  {}\n{}\n",
        "Provider",
        "Stable id",
        "Image",
        "Context",
        "Price in/out per 1M",
        "-".repeat(80)
    );
    for entry in entries {
        let context = entry
            .context_window
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let image = if entry.input.contains(&Modality::Image) {
            "yes"
        } else {
            "no"
        };
        out.push_str(&format!(
            "{:<12} {:<28} {:<6} {:>9}  {}\n",
            entry.provider,
            entry.stable,
            image,
            context,
            format_pricing(&entry.pricing)
        ));
    }
    out
}

fn metric_row(name: &str, metric: &AggregateMetric) -> String {
    format!(
        "{:<32} {:>7.2}% {:>8.4} {:>6}\n",
        name,
        metric.acc * 100.0,
        metric.std_dev,
        metric.num_example
    )
}

fn table_header(first: &str) -> String {
    format!(
        "{:<32} {:>8} {:>8} {:>6}\n{}\n",
        first,
        "Acc",
        "StdDev",
        "N",
        "-".repeat(57)
    )
}

fn format_units_plain(reports: &[UnitReport]) -> String {
    if reports.is_empty() {
        return "No units were evaluated.\n".to_string();
    }

    let mut out = table_header("Subject / Split");
    for report in reports {
        let name = format!("{}/{}{}", report.subject, report.split, if report.reused { " *" } else { "" });
        out.push_str(&metric_row(&name, &report.result.metric));
        if let Some(difficulties) = &report.result.difficulties {
            for (level, metric) in difficulties {
                out.push_str(&metric_row(&format!("  {}", level), metric));
            }
        }
    }
    if reports.iter().any(|r| r.reused) {
        out.push_str("* existing results, not recomputed\n");
    }
    out
}

fn format_group(out: &mut String, title: &str, groups: &BTreeMap<String, AggregateMetric>) {
    if groups.is_empty() {
        return;
    }
    out.push('\n');
    out.push_str(&table_header(title));
    for (name, metric) in groups {
        out.push_str(&metric_row(name, metric));
    }
}

fn format_totals_plain(totals: &[TotalResult]) -> String {
    let mut out = String::new();
    for (i, total) in totals.iter().enumerate() {
        out.push_str(&format!("=== {} / {} ===\n", total.model, total.split));
        out.push_str(&table_header("Overall"));
        out.push_str(&metric_row("all subjects", &total.metric));
        format_group(&mut out, "Dimension", &total.by_dimension);
        format_group(&mut out, "Subject", &total.by_subject);
        if i + 1 < totals.len() {
            out.push('\n');
        }
    }
    out
}

/// Print results in JSON format
fn print_json<T: Serialize + ?Sized>(results: &T) {
    match serde_json::to_string_pretty(results) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}
