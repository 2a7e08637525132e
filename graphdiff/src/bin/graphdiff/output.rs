use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use graphdiff::{
    ComparisonResult, CountComparison, ProgressSink, ProgressSnapshot, TypeComparison, TypeStatus,
    report::SkipReason,
};
use serde::Serialize;
use std::io::Write;

use crate::theme::{ICONS, THEME};
use crate::utils::{format_count, format_duration, format_signed};

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Trait for data that can be displayed as a table
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

/// Output manager handles formatting and display
#[derive(Clone)]
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.options.output_format, OutputFormat::Json)
    }

    /// Display data according to the configured output format
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }

        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            OutputFormat::Table => {
                let table = data.to_table(&self.options);
                println!("{table}");
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    /// Print any serializable value as pretty JSON
    pub fn display_json<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        if !self.options.quiet {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        Ok(())
    }

    /// Print a prepared table unless quiet or not in table mode
    pub fn table(&self, table: &Table) {
        if !self.options.quiet && matches!(self.options.output_format, OutputFormat::Table) {
            println!("{table}");
        }
    }

    /// Display a success message with color and icon
    pub fn success(&self, message: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.success)
            } else {
                format!("{} {}", ICONS.success.color(THEME.success), message.color(THEME.success))
            };
            println!("{output}");
        }
    }

    /// Display an error message with color and icon
    pub fn error(&self, message: &str) {
        let output = if self.options.no_color {
            format!("{} {message}", ICONS.error)
        } else {
            format!("{} {}", ICONS.error.color(THEME.error), message.color(THEME.error))
        };
        eprintln!("{output}");
    }

    /// Display a warning message
    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.warning)
            } else {
                format!("{} {}", ICONS.warning.color(THEME.warning), message.color(THEME.warning))
            };
            println!("{output}");
        }
    }

    /// Display verbose information (only if verbose mode is enabled)
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.arrow)
            } else {
                format!("{} {}", ICONS.arrow.color(THEME.muted), message.color(THEME.muted))
            };
            eprintln!("{output}");
        }
    }

    /// Display info message with color and icon
    pub fn info(&self, message: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.info)
            } else {
                format!("{} {}", ICONS.info.color(THEME.info), message.color(THEME.info))
            };
            println!("{output}");
        }
    }

    /// Display a heading
    pub fn heading(&self, text: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("\n{text}\n{}", "=".repeat(text.chars().count()))
            } else {
                format!("\n{}", text.color(THEME.primary).bold())
            };
            println!("{output}");
        }
    }

    /// Display a key-value pair
    pub fn key_value(&self, key: &str, value: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("{key}: {value}")
            } else {
                format!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value))
            };
            println!("{output}");
        }
    }

    /// Display a bullet list item
    pub fn bullet(&self, text: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("  {} {text}", ICONS.bullet)
            } else {
                format!("  {} {text}", ICONS.bullet.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    /// Display indented text with a prefix icon
    pub fn indented(&self, icon: &str, text: &str) {
        if !self.options.quiet {
            let output = if self.options.no_color {
                format!("    {icon} {text}")
            } else {
                format!("    {} {text}", icon.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    /// Create a themed table
    pub fn create_table(&self) -> Table {
        themed_table(&self.options)
    }

    /// Add themed header to table
    pub fn add_table_header(&self, table: &mut Table, headers: Vec<&str>) {
        set_header(table, &self.options, headers);
    }

    /// Display progress indicator
    pub fn progress(&self, message: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }

        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.loading)
        } else {
            format!(
                "{} {}...",
                ICONS.loading.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };

        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    /// Clear the current line (useful after progress indicators)
    pub fn clear_line(&self) {
        if self.options.quiet || self.is_json() {
            return;
        }

        print!("\r{}", " ".repeat(100));
        print!("\r");
        std::io::stdout().flush().ok();
    }
}

fn themed_table(options: &GlobalOptions) -> Table {
    let mut table = Table::new();
    if !options.no_color {
        table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
    } else {
        table.load_preset(comfy_table::presets::ASCII_FULL);
    }
    table
}

fn set_header(table: &mut Table, options: &GlobalOptions, headers: Vec<&str>) {
    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            if options.no_color { cell } else { cell.fg(TableColor::Cyan) }
        })
        .collect();
    table.set_header(header_cells);
}

fn status_cell(ok: bool, text: &str, options: &GlobalOptions) -> Cell {
    let icon = if ok { ICONS.success } else { ICONS.error };
    let cell = Cell::new(format!("{icon} {text}"));
    match (options.no_color, ok) {
        (true, _) => cell,
        (false, true) => cell.fg(TableColor::Green),
        (false, false) => cell.fg(TableColor::Red),
    }
}

/// Per-type count table for one kind of entity
pub fn count_table(comparison: &CountComparison, options: &GlobalOptions) -> Table {
    let mut table = themed_table(options);
    set_header(&mut table, options, vec!["Type", "Source", "Target", "Difference", "Status"]);

    let types: std::collections::BTreeSet<&String> = comparison
        .source_counts
        .keys()
        .chain(comparison.target_counts.keys())
        .collect();

    for name in types {
        let source = comparison.source_count(name);
        let target = comparison.target_count(name);
        let difference = target as i64 - source as i64;
        let status = if source == target {
            "match"
        } else if target == 0 {
            "missing in target"
        } else if source == 0 {
            "missing in source"
        } else {
            "count differs"
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(format_count(source)),
            Cell::new(format_count(target)),
            Cell::new(format_signed(difference)),
            status_cell(source == target, status, options),
        ]);
    }

    table.add_row(vec![
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new(format_count(comparison.source_total)).add_attribute(Attribute::Bold),
        Cell::new(format_count(comparison.target_total)).add_attribute(Attribute::Bold),
        Cell::new(format_signed(comparison.target_total as i64 - comparison.source_total as i64)),
        status_cell(comparison.totals_match(), if comparison.totals_match() { "match" } else { "differs" }, options),
    ]);

    table
}

fn type_status_text(comparison: &TypeComparison) -> (bool, String) {
    match &comparison.status {
        TypeStatus::Compared if comparison.has_content_differences() => (false, "different".to_string()),
        TypeStatus::Compared => (true, "identical".to_string()),
        TypeStatus::Skipped {
            reason: SkipReason::EmptySource,
        } => (true, "skipped (no source data)".to_string()),
        TypeStatus::Skipped {
            reason: SkipReason::NoIdentifyingProperty,
        } => (true, "skipped (no key property)".to_string()),
        TypeStatus::Failed { error } => (false, format!("failed: {error}")),
        TypeStatus::Cancelled => (false, "cancelled".to_string()),
    }
}

/// Per-label content comparison table
pub fn content_table(result: &ComparisonResult, options: &GlobalOptions) -> Table {
    let mut table = themed_table(options);
    set_header(
        &mut table,
        options,
        vec!["Label", "Key", "Compared", "Identical", "Different", "Missing in target", "Missing in source", "Status"],
    );

    for comparison in result.type_comparisons.values() {
        let key = match (&comparison.source_key_property, &comparison.target_key_property) {
            (Some(source), Some(target)) if source != target => format!("{source} / {target}"),
            (Some(source), _) => source.clone(),
            (None, _) => "-".to_string(),
        };
        let (ok, status) = type_status_text(comparison);
        table.add_row(vec![
            Cell::new(&comparison.label),
            Cell::new(key),
            Cell::new(format_count(comparison.keys_compared)),
            Cell::new(format_count(comparison.identical)),
            Cell::new(format_count(comparison.different)),
            Cell::new(format_count(comparison.missing_in_target)),
            Cell::new(format_count(comparison.missing_in_source)),
            status_cell(ok, &status, options),
        ]);
    }

    table
}

impl TableDisplay for ComparisonResult {
    /// Summary table
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options);
        set_header(&mut table, options, vec!["Check", "Result"]);

        let summary = &self.summary;
        let rows = [
            (
                "Total nodes",
                summary.total_nodes.matches,
                format!(
                    "{} vs {}",
                    format_count(summary.total_nodes.source),
                    format_count(summary.total_nodes.target)
                ),
            ),
            (
                "Total relationships",
                summary.total_relationships.matches,
                format!(
                    "{} vs {}",
                    format_count(summary.total_relationships.source),
                    format_count(summary.total_relationships.target)
                ),
            ),
            ("Node type counts", summary.node_types_match, String::new()),
            ("Relationship type counts", summary.relationship_types_match, String::new()),
            ("Content", summary.content_match, String::new()),
            (
                "Counts complete",
                summary.counts_complete,
                (if summary.counts_complete { "yes" } else { "no, see warnings" }).to_string(),
            ),
            ("Identical", self.is_identical(), String::new()),
        ];

        for (check, ok, detail) in rows {
            let text = if detail.is_empty() {
                (if ok { "match" } else { "differs" }).to_string()
            } else {
                detail
            };
            table.add_row(vec![Cell::new(check), status_cell(ok, &text, options)]);
        }

        table
    }

    fn to_compact(&self) -> String {
        format!(
            "identical={} nodes={}/{} relationships={}/{} node_types_match={} relationship_types_match={} content_match={} counts_complete={} duration={}",
            self.is_identical(),
            self.summary.total_nodes.source,
            self.summary.total_nodes.target,
            self.summary.total_relationships.source,
            self.summary.total_relationships.target,
            self.summary.node_types_match,
            self.summary.relationship_types_match,
            self.summary.content_match,
            self.summary.counts_complete,
            format_duration(std::time::Duration::from_millis(self.duration_ms)),
        )
    }
}

/// Single redrawn status line fed by the comparator
pub struct ConsoleProgress {
    output: OutputManager,
}

impl ConsoleProgress {
    pub fn new(output: OutputManager) -> Self {
        Self { output }
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&mut self, snapshot: &ProgressSnapshot) {
        let mut line = format!("{:>3.0}% {}", snapshot.percent(), snapshot.phase);
        if let Some(current) = &snapshot.current_type {
            line.push_str(&format!(
                " {current} {}/{}",
                format_count(snapshot.items_done),
                format_count(snapshot.items_total)
            ));
            if snapshot.items_per_second > 0.0 {
                line.push_str(&format!(" {:.1}/s", snapshot.items_per_second));
            }
        }
        if let Some(eta) = snapshot.eta {
            line.push_str(&format!(" eta {}", format_duration(eta)));
        }
        self.output.clear_line();
        self.output.progress(&line);
    }

    fn finish(&mut self, snapshot: &ProgressSnapshot) {
        self.output.clear_line();
        self.output.verbose(&format!(
            "{} after {} ({:.0}% of planned work)",
            snapshot.phase,
            format_duration(snapshot.elapsed),
            snapshot.percent()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdiff::{CompareMode, EndpointInfo, SchemaScope};
    use std::collections::BTreeMap;

    fn result() -> ComparisonResult {
        let mut result = ComparisonResult::new(
            EndpointInfo {
                uri: "bolt://a".to_string(),
            },
            EndpointInfo {
                uri: "bolt://b".to_string(),
            },
            CompareMode::FullDiff,
            SchemaScope::All,
        );
        result.node_comparison = CountComparison::from_counts(
            BTreeMap::from([("Dataset".to_string(), 3)]),
            BTreeMap::from([("Dataset".to_string(), 2)]),
        );
        result.summarize();
        result
    }

    #[test]
    fn test_output_manager_json() {
        let options = GlobalOptions {
            output_format: OutputFormat::Json,
            ..Default::default()
        };
        let manager = OutputManager::new(options);
        assert!(manager.display(&result()).is_ok());
    }

    #[test]
    fn test_output_manager_quiet() {
        let options = GlobalOptions {
            quiet: true,
            ..Default::default()
        };
        let manager = OutputManager::new(options);
        assert!(manager.display(&result()).is_ok());
    }

    #[test]
    fn test_count_table_lists_every_type_and_total() {
        let options = GlobalOptions {
            no_color: true,
            ..Default::default()
        };
        let rendered = count_table(&result().node_comparison, &options).to_string();
        assert!(rendered.contains("Dataset"));
        assert!(rendered.contains("-1"));
        assert!(rendered.contains("Total"));
    }

    #[test]
    fn test_compact_summary() {
        let line = result().to_compact();
        assert!(line.starts_with("identical=false"));
        assert!(line.contains("nodes=3/2"));
    }
}
