use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use graphdiff::{
    BatchSizing, CandidateKeys, Comparator, CompareMode, CompareOptions, ComparisonResult, CountComparison, DiffError,
    Difference, Endpoint, EndpointInfo, KeyStrategy, LogProgress, Neo4jSession, ProgressReporter, RunOutcome,
    SchemaScope, Side,
    comparator::{DEFAULT_MAX_REPORTED_DIFFERENCES, DEFAULT_SAMPLE_SIZE},
    fetch::DEFAULT_BATCH_SIZE,
};

use crate::context::{CompareSettings, ConfigContext};
use crate::examples::ExampleGroup;
use crate::output::{ConsoleProgress, OutputManager, content_table, count_table};
use crate::theme::ICONS;
use crate::utils::{format_datetime, format_duration};

const DEFAULT_USER: &str = "neo4j";

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Quick Check",
        commands: &[
            "graphdiff compare --source-uri bolt://localhost:7687 --target-uri bolt://staging:7687",
            "graphdiff compare --source-env local --target-env remote   # Profiles from graphdiff.toml",
        ],
    },
    ExampleGroup {
        title: "Full Diff",
        commands: &[
            "graphdiff compare --source-env local --target-env remote --full-diff --report diff.json",
            "graphdiff compare --source-env local --target-env remote --full-diff --timeout-secs 600",
        ],
    },
    ExampleGroup {
        title: "Scoped & Scripted",
        commands: &[
            "graphdiff compare --source-env local --target-env remote --scoped   # Papers-with-Code types only",
            "graphdiff --output json compare --source-env local --target-env remote > diff.json",
        ],
    },
];

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Source endpoint URI
    #[arg(long, env = "GRAPHDIFF_SOURCE_URI")]
    pub source_uri: Option<String>,

    /// Source username (default: neo4j)
    #[arg(long, env = "GRAPHDIFF_SOURCE_USER")]
    pub source_user: Option<String>,

    /// Source password
    #[arg(long, env = "GRAPHDIFF_SOURCE_PASSWORD", hide_env_values = true)]
    pub source_password: Option<String>,

    /// Target endpoint URI
    #[arg(long, env = "GRAPHDIFF_TARGET_URI")]
    pub target_uri: Option<String>,

    /// Target username (default: neo4j)
    #[arg(long, env = "GRAPHDIFF_TARGET_USER")]
    pub target_user: Option<String>,

    /// Target password
    #[arg(long, env = "GRAPHDIFF_TARGET_PASSWORD", hide_env_values = true)]
    pub target_password: Option<String>,

    /// Use a profile from the config file as source
    #[arg(long, value_name = "NAME")]
    pub source_env: Option<String>,

    /// Use a profile from the config file as target
    #[arg(long, value_name = "NAME")]
    pub target_env: Option<String>,

    /// Keys sampled per label in sampled mode, at least 1 (default: 10)
    #[arg(long)]
    pub sample_size: Option<NonZeroUsize>,

    /// Keys fetched per query (default: 100; Paper uses 10)
    #[arg(long)]
    pub batch_size: Option<NonZeroUsize>,

    /// Compare every key on both sides instead of a sample
    #[arg(long)]
    pub full_diff: bool,

    /// Only compare the built-in Papers-with-Code node labels and relationship types
    #[arg(long)]
    pub scoped: bool,

    /// Differences listed per label in the report (default: 20)
    #[arg(long)]
    pub max_differences: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Write the JSON report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

/// Explicit flags win over the named profile, which wins over defaults.
fn resolve_endpoint(
    ctx: &ConfigContext,
    side: Side,
    profile: Option<&str>,
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> Result<Endpoint> {
    let base = profile.map(|name| ctx.endpoint(name)).transpose()?;

    let uri = uri.or_else(|| base.as_ref().map(|e| e.uri.clone())).with_context(|| {
        format!("No {side} endpoint given. Use --{side}-uri or --{side}-env (or GRAPHDIFF_{}_URI)", side.to_string().to_uppercase())
    })?;
    let user = user
        .or_else(|| base.as_ref().map(|e| e.user.clone()))
        .unwrap_or_else(|| DEFAULT_USER.to_string());
    let password = password.or_else(|| base.map(|e| e.password)).unwrap_or_default();

    Ok(Endpoint::new(uri, user, password))
}

fn build_options(args: &CompareArgs, ctx: &ConfigContext) -> CompareOptions {
    let settings: CompareSettings = ctx.settings();

    let mode = if args.full_diff {
        CompareMode::FullDiff
    } else {
        CompareMode::Sampled {
            sample_size: args
                .sample_size
                .or(settings.sample_size)
                .map_or(DEFAULT_SAMPLE_SIZE, NonZeroUsize::get),
        }
    };

    let mut batch = BatchSizing::new(
        args.batch_size
            .or(settings.batch_size)
            .map_or(DEFAULT_BATCH_SIZE, NonZeroUsize::get),
    );
    let mut keys = KeyStrategy::default();
    if let Some(config) = &ctx.config {
        for (label, size) in &config.batch_overrides {
            batch = batch.with_override(label, *size);
        }
        for (label, candidates) in &config.keys {
            keys = keys.with_label(label, CandidateKeys::new(candidates.iter().cloned()));
        }
    }

    let scope = if args.scoped || settings.scoped.unwrap_or(false) {
        SchemaScope::papers_with_code()
    } else {
        SchemaScope::All
    };

    CompareOptions {
        mode,
        batch,
        scope,
        keys,
        max_reported_differences: args
            .max_differences
            .or(settings.max_differences)
            .unwrap_or(DEFAULT_MAX_REPORTED_DIFFERENCES),
        timeout: args.timeout_secs.or(settings.timeout_secs).map(Duration::from_secs),
    }
}

/// Run a comparison. Returns whether both instances are identical.
pub async fn handle_compare(args: CompareArgs, config_path: &Path, output: &OutputManager) -> Result<bool> {
    let ctx = ConfigContext::load(config_path)?;
    if ctx.exists() {
        output.verbose(&format!("Using config {}", config_path.display()));
    }

    let source = resolve_endpoint(
        &ctx,
        Side::Source,
        args.source_env.as_deref(),
        args.source_uri.clone(),
        args.source_user.clone(),
        args.source_password.clone(),
    )?;
    let target = resolve_endpoint(
        &ctx,
        Side::Target,
        args.target_env.as_deref(),
        args.target_uri.clone(),
        args.target_user.clone(),
        args.target_password.clone(),
    )?;
    let options = build_options(&args, &ctx);

    output.heading("Graph Comparison");
    output.key_value("Source", &source.to_string());
    output.key_value("Target", &target.to_string());
    output.key_value("Mode", &options.mode.to_string());
    if options.scope.is_scoped() {
        output.key_value("Scope", "Papers-with-Code types only");
    }

    output.progress("Connecting");
    let (source_session, target_session) = tokio::join!(Neo4jSession::connect(&source), Neo4jSession::connect(&target));
    output.clear_line();
    let source_session = source_session
        .map_err(|err| DiffError::connection(Side::Source, err))
        .with_context(|| format!("Could not connect to {}", source.uri))?;
    let target_session = target_session
        .map_err(|err| DiffError::connection(Side::Target, err))
        .with_context(|| format!("Could not connect to {}", target.uri))?;
    output.success("Connected to both endpoints");

    let progress = if output.options.quiet || output.is_json() {
        ProgressReporter::new(LogProgress)
    } else {
        ProgressReporter::new(ConsoleProgress::new(output.clone()))
    };

    let mut comparator = Comparator::new(source_session, target_session, options)
        .with_endpoints(
            EndpointInfo {
                uri: source.uri.clone(),
            },
            EndpointInfo {
                uri: target.uri.clone(),
            },
        )
        .with_progress(progress);

    let token = comparator.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let run = comparator.run().await;
    ctrl_c.abort();

    let result = match run {
        Ok(result) => result,
        Err(err) => {
            if let Some(path) = &args.report {
                comparator.partial().write_json(path)?;
                output.info(&format!("Partial report saved to {}", path.display()));
            }
            comparator.close().await;
            return Err(err).context("Comparison failed");
        }
    };
    comparator.close().await;

    render_result(&result, output)?;

    if let Some(path) = &args.report {
        result
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        if !output.is_json() {
            output.success(&format!("Report saved to {}", path.display()));
        }
    }

    if !output.is_json() {
        match &result.outcome {
            RunOutcome::Cancelled { phase } => {
                output.warning(&format!("Comparison cancelled while {phase}; results are partial"))
            }
            _ if result.is_identical() => output.success("Instances are identical"),
            _ => output.error("Instances have differences"),
        }
    }

    Ok(result.is_identical())
}

fn render_result(result: &ComparisonResult, output: &OutputManager) -> Result<()> {
    if !matches!(output.options.output_format, crate::output::OutputFormat::Table) {
        return output.display(result);
    }

    output.heading("Node Counts");
    output.table(&count_table(&result.node_comparison, &output.options));

    output.heading("Relationship Counts");
    output.table(&count_table(&result.relationship_comparison, &output.options));
    render_count_failures("node", &result.node_comparison, output);
    render_count_failures("relationship", &result.relationship_comparison, output);

    if !result.type_comparisons.is_empty() {
        output.heading("Content Comparison");
        output.table(&content_table(result, &output.options));
        render_differences(result, output);
    }

    output.heading("Summary");
    output.key_value("Run", &result.run_id.to_string());
    output.key_value("Started", &format_datetime(result.started_at));
    output.key_value("Duration", &format_duration(Duration::from_millis(result.duration_ms)));
    output.display(result)
}

fn render_count_failures(kind: &str, comparison: &CountComparison, output: &OutputManager) {
    for (side, error) in [
        (Side::Source, &comparison.source_discovery_error),
        (Side::Target, &comparison.target_discovery_error),
    ] {
        if let Some(error) = error {
            output.warning(&format!("Could not list {kind} types on {side}: {error}"));
        }
    }
    for (side, errors) in [
        (Side::Source, &comparison.source_count_errors),
        (Side::Target, &comparison.target_count_errors),
    ] {
        for (name, error) in errors {
            output.warning(&format!("{name} count on {side} failed and is shown as 0: {error}"));
        }
    }
}

fn render_differences(result: &ComparisonResult, output: &OutputManager) {
    for comparison in result.type_comparisons.values() {
        if comparison.differences.is_empty() {
            continue;
        }

        output.info(&format!("{} differences", comparison.label));
        for difference in &comparison.differences {
            match difference {
                Difference::MissingInTarget { key, .. } => output.indented(ICONS.minus, &format!("{key} missing in target")),
                Difference::MissingInSource { key, .. } => output.indented(ICONS.plus, &format!("{key} missing in source")),
                Difference::Different { key, changed_fields, .. } => {
                    output.indented(ICONS.changed, &format!("{key} changed: {}", changed_fields.join(", ")))
                }
            }
        }
        if comparison.truncated {
            output.bullet("more differences not listed (see --max-differences)");
        }
    }
}
