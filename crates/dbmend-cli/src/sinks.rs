//! Report sinks for the command line

use colored::Colorize;
use dbmend_core::{Report, RepairOutcome, Status};
use dbmend_engine::ReportSink;
use std::path::PathBuf;

/// Prints a colored summary to stdout
pub struct ConsoleSink;

impl ReportSink for ConsoleSink {
    fn publish(&mut self, report: &Report) -> Result<(), std::io::Error> {
        print_report_summary(report);
        Ok(())
    }
}

/// Writes report.json
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonFileSink {
    fn publish(&mut self, report: &Report) -> Result<(), std::io::Error> {
        report.save_to_file(&self.path)?;
        println!("{} {}", "Report written to:".green(), self.path.display());
        Ok(())
    }
}

/// Writes a markdown report
pub struct MarkdownSink {
    path: PathBuf,
}

impl MarkdownSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for MarkdownSink {
    fn publish(&mut self, report: &Report) -> Result<(), std::io::Error> {
        std::fs::write(&self.path, generate_markdown_report(report))?;
        println!("{} {}", "Markdown report written to:".green(), self.path.display());
        Ok(())
    }
}

fn status_label(status: Status) -> colored::ColoredString {
    match status {
        Status::Failure => status.as_str().red().bold(),
        Status::Warning => status.as_str().yellow().bold(),
        Status::Preview => status.as_str().cyan(),
        Status::Success => status.as_str().green(),
        Status::Info => status.as_str().normal(),
        Status::Debug => status.as_str().dimmed(),
    }
}

fn print_outcome(outcome: &RepairOutcome) {
    let mut lines = outcome.message().lines();
    let first = lines.next().unwrap_or_default();
    match outcome.subject_id() {
        Some(subject) => println!("  [{}] {}: {}", status_label(outcome.status()), subject, first),
        None => println!("  [{}] {}", status_label(outcome.status()), first),
    }
    for line in lines {
        println!("      {}", line);
    }
}

pub fn print_report_summary(report: &Report) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "dbmend Repair Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!("Mode: {}", if report.mode.is_preview() { "preview".cyan() } else { "commit".bold() });
    println!();

    let summary = &report.summary;
    println!("{}", "Summary:".bold());
    println!("  Modules run:  {}", summary.modules_run);
    if summary.modules_aborted > 0 {
        println!("  Aborted:      {}", format!("{}", summary.modules_aborted).red().bold());
    }
    println!("  Total outcomes: {}", summary.total);

    if summary.failures > 0 {
        println!("  Failures: {}", format!("{}", summary.failures).red().bold());
    } else {
        println!("  Failures: {}", format!("{}", summary.failures).green());
    }

    if summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", summary.warnings).green());
    }

    println!("  Previews: {}", summary.previews);
    println!("  Repairs:  {}", summary.successes);
    println!("  Info:     {}", summary.info);
    println!();

    for module in &report.modules {
        let mut header = format!("▸ {}", module.name).bold();
        if module.aborted {
            header = format!("{} (aborted)", header).red().bold();
        }
        println!("{}", header);
        if module.deregistered {
            println!("  {}", "deregistered after this run".dimmed());
        }
        for outcome in &module.outcomes {
            print_outcome(outcome);
        }
        println!();
    }

    if report.is_healthy() {
        println!("{}", "✓ No problems found!".green().bold());
    } else if report.has_failures() {
        println!("{}", "✗ Some modules failed".red().bold());
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

pub fn generate_markdown_report(report: &Report) -> String {
    let mut md = String::new();

    md.push_str("# dbmend Repair Report\n\n");
    md.push_str(&format!("**Version:** {}\n\n", report.version));
    md.push_str(&format!("**Timestamp:** {}\n\n", report.timestamp));
    md.push_str(&format!(
        "**Mode:** {}\n\n",
        if report.mode.is_preview() { "preview" } else { "commit" }
    ));

    md.push_str("## Summary\n\n");
    md.push_str(&format!("- Modules run: {}\n", report.summary.modules_run));
    md.push_str(&format!("- Modules aborted: {}\n", report.summary.modules_aborted));
    md.push_str(&format!("- Failures: {}\n", report.summary.failures));
    md.push_str(&format!("- Warnings: {}\n", report.summary.warnings));
    md.push_str(&format!("- Previews: {}\n", report.summary.previews));
    md.push_str(&format!("- Repairs: {}\n", report.summary.successes));
    md.push_str(&format!("- Info: {}\n", report.summary.info));
    md.push('\n');

    if report.is_healthy() {
        md.push_str("✅ **No problems found!**\n\n");
    }

    for module in &report.modules {
        md.push_str(&format!("## {}\n\n", module.name));
        if module.aborted {
            md.push_str("❌ **Aborted**\n\n");
        }
        if module.deregistered {
            md.push_str("_Deregistered after this run._\n\n");
        }

        for outcome in &module.outcomes {
            let emoji = match outcome.status() {
                Status::Failure => "❌",
                Status::Warning => "⚠️",
                Status::Preview => "🔍",
                Status::Success => "✅",
                Status::Info | Status::Debug => "ℹ️",
            };
            let mut lines = outcome.message().lines();
            let first = lines.next().unwrap_or_default();
            match outcome.subject_id() {
                Some(subject) => md.push_str(&format!(
                    "- {} **{}** `{}`: {}\n",
                    emoji,
                    outcome.status(),
                    subject,
                    first
                )),
                None => md.push_str(&format!("- {} **{}** {}\n", emoji, outcome.status(), first)),
            }
            let rest: Vec<&str> = lines.collect();
            if !rest.is_empty() {
                md.push_str("\n  ```\n");
                for line in rest {
                    md.push_str(&format!("  {}\n", line));
                }
                md.push_str("  ```\n");
            }
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmend_core::{ModuleReport, RunMode};

    fn sample_report() -> Report {
        let mut report = Report::new(RunMode::Commit);
        let mut module = ModuleReport::new(
            "orphaned-relationships",
            vec![
                RepairOutcome::new(Status::Info, None, "orphaned-relationships", "scanning"),
                RepairOutcome::new(
                    Status::Success,
                    None,
                    "orphaned-relationships",
                    "Deleted 2 orphaned rows in relationships:\n     2      9",
                ),
            ],
        );
        module.deregistered = true;
        report.add_module(module);

        let mut broken = ModuleReport::new(
            "broken",
            vec![RepairOutcome::new(
                Status::Failure,
                Some("7".to_string()),
                "broken",
                "broken aborted: Store error",
            )],
        );
        broken.aborted = true;
        report.add_module(broken);
        report
    }

    #[test]
    fn markdown_lists_modules_and_outcomes() {
        let md = generate_markdown_report(&sample_report());

        assert!(md.starts_with("# dbmend Repair Report"));
        assert!(md.contains("**Mode:** commit"));
        assert!(md.contains("- Failures: 1"));
        assert!(md.contains("## orphaned-relationships"));
        assert!(md.contains("_Deregistered after this run._"));
        assert!(md.contains("- ✅ **SUCCESS** Deleted 2 orphaned rows in relationships:"));
        assert!(md.contains("       2      9"));
        assert!(md.contains("## broken\n\n❌ **Aborted**"));
        assert!(md.contains("**FAILURE** `7`: broken aborted"));
        assert!(!md.contains("No problems found"));
    }

    #[test]
    fn json_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        JsonFileSink::new(&path).publish(&sample_report()).unwrap();

        let loaded: Report = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.summary.failures, 1);
        assert_eq!(loaded.modules.len(), 2);
    }
}
