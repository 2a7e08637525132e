mod commands;
mod context;
mod examples;
mod output;
mod theme;
mod utils;

use std::fmt::Write;
use std::io::{self, Write as IoWrite};
use std::path::PathBuf;

use anyhow::Result;
use clap::{
    ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand,
    builder::{
        Styles,
        styling::{AnsiColor, Color as ClapColor, Style},
    },
    error::ErrorKind,
};
use colored::{Color as ThemeColor, Colorize, control::ShouldColorize};
use env_logger::Env;

use commands::{
    compare::{CompareArgs, handle_compare},
    config::{ConfigCommands, handle_config_commands},
};
use context::DEFAULT_CONFIG_FILE;
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("GRAPHDIFF_SOURCE_URI", "Source endpoint URI (bolt://, neo4j://)"),
    ("GRAPHDIFF_SOURCE_USER", "Source username"),
    ("GRAPHDIFF_SOURCE_PASSWORD", "Source password"),
    ("GRAPHDIFF_TARGET_URI", "Target endpoint URI"),
    ("GRAPHDIFF_TARGET_USER", "Target username"),
    ("GRAPHDIFF_TARGET_PASSWORD", "Target password"),
    ("RUST_LOG", "Log filter, e.g. graphdiff=debug"),
];

#[derive(Parser)]
#[command(name = "graphdiff")]
#[command(author = "Graphdiff Team")]
#[command(version)]
#[command(
    about = "Compare two property-graph instances and report what differs",
    long_about = r#"Reconciliation tool for two property-graph instances that provides:

• Per-label and per-relationship-type count comparison
• Identity resolution from candidate key properties
• Sampled or full content diff with volatile timestamps ignored
• Progress reporting, cancellation and a JSON report

Commands:
  compare   Compare a source and a target instance
  config    Manage endpoint profiles in graphdiff.toml

Exit status is 0 only when the instances are identical.
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Config file with endpoint profiles
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE, value_name = "PATH")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parses with themed help. Help, version and usage errors exit here.
    fn parse_with_styles() -> Self {
        let matches = match build_cli_command().try_get_matches() {
            Ok(matches) => matches,
            Err(err) => exit_with_clap_error(err),
        };
        Cli::from_arg_matches(&matches).unwrap_or_else(|err| exit_with_clap_error(err))
    }
}

fn exit_with_clap_error(err: clap::error::Error) -> ! {
    if err.kind() == ErrorKind::MissingSubcommand {
        let mut command = build_cli_command();
        let _ = blank_line(io::stderr());
        eprintln!("error: 'graphdiff' requires a subcommand but one was not provided");
        let _ = blank_line(io::stderr());
        let _ = command.write_long_help(&mut io::stderr());
        let _ = blank_line(io::stderr());
        std::process::exit(err.exit_code());
    }

    let to_stdout = matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
    let pad = || if to_stdout { blank_line(io::stdout()) } else { blank_line(io::stderr()) };
    let _ = pad();
    if let Err(print_err) = err.print()
        && print_err.kind() != io::ErrorKind::BrokenPipe
    {
        eprintln!("Failed to display help: {print_err}");
    }
    let _ = pad();
    std::process::exit(err.exit_code());
}

fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .styles(help_styles())
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never })
        .after_long_help(render_appendix(use_color));

    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand.clone().after_long_help(render_examples(example.groups, use_color));
        }
    }
    command
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", paint("Examples:", THEME.highlight, true, use_color));

    for (index, group) in groups.iter().enumerate() {
        if index > 0 {
            buffer.push('\n');
        }
        let _ = writeln!(buffer, "  {}", paint(group.title, THEME.primary, true, use_color));
        for command in group.commands {
            let line = format!("{} {command}", ICONS.arrow);
            let _ = writeln!(buffer, "    {}", paint(&line, THEME.secondary, false, use_color));
        }
    }
    buffer
}

fn render_appendix(use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", paint("Environment Variables:", THEME.highlight, true, use_color));
    for (key, description) in ENVIRONMENT_VARIABLES {
        let _ = writeln!(
            buffer,
            "  {}  {}",
            paint(key, THEME.key, true, use_color),
            paint(description, THEME.value, false, use_color)
        );
    }

    let _ = writeln!(
        buffer,
        "\n{} {}",
        paint("Tip:", THEME.highlight, true, use_color),
        paint(
            "Use 'graphdiff <command> --help' to view examples for each command.",
            THEME.secondary,
            false,
            use_color
        )
    );
    buffer
}

fn blank_line(mut out: impl IoWrite) -> io::Result<()> {
    out.write_all(b"\n")?;
    out.flush()
}

fn paint(text: &str, color: ThemeColor, bold: bool, use_color: bool) -> String {
    match (use_color, bold) {
        (false, _) => text.to_string(),
        (true, false) => text.color(color).to_string(),
        (true, true) => text.color(color).bold().to_string(),
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .usage(style_from_color(THEME.primary).bold())
        .header(style_from_color(THEME.highlight).bold())
        .literal(style_from_color(THEME.secondary))
        .placeholder(style_from_color(THEME.muted))
        .valid(style_from_color(THEME.success))
        .invalid(style_from_color(THEME.warning))
        .error(style_from_color(THEME.error).bold())
}

/// Only the colours the theme uses have a help-style counterpart.
fn style_from_color(color: ThemeColor) -> Style {
    let ansi = match color {
        ThemeColor::Red => AnsiColor::Red,
        ThemeColor::Green => AnsiColor::Green,
        ThemeColor::Yellow => AnsiColor::Yellow,
        ThemeColor::Blue => AnsiColor::Blue,
        ThemeColor::Magenta => AnsiColor::Magenta,
        ThemeColor::Cyan => AnsiColor::Cyan,
        ThemeColor::BrightBlack => AnsiColor::BrightBlack,
        ThemeColor::BrightBlue => AnsiColor::BrightBlue,
        ThemeColor::BrightCyan => AnsiColor::BrightCyan,
        _ => AnsiColor::White,
    };
    Style::new().fg_color(Some(ClapColor::Ansi(ansi)))
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a source and a target instance
    Compare(CompareArgs),

    /// Manage endpoint profiles
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_with_styles();

    let default_filter = if cli.verbose { "graphdiff=debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let machine_output = matches!(cli.output, OutputFormat::Json | OutputFormat::Compact);
    if !machine_output {
        let _ = blank_line(io::stdout());
    }

    match execute(cli).await {
        Ok(identical) => {
            if !machine_output {
                let _ = blank_line(io::stdout());
            }
            if !identical {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            let _ = blank_line(io::stderr());
            std::process::exit(1);
        }
    }
}

/// Returns false when the command succeeded but found differences or invalid config.
async fn execute(cli: Cli) -> Result<bool> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let global_options = GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    let output = OutputManager::new(global_options);

    match cli.command {
        Commands::Compare(args) => handle_compare(args, &cli.config, &output).await,
        Commands::Config(config_cmd) => handle_config_commands(config_cmd, &cli.config, &output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_styles_follow_the_theme() {
        assert_eq!(
            style_from_color(THEME.error).get_fg_color(),
            Some(ClapColor::Ansi(AnsiColor::Red))
        );
        assert_eq!(
            style_from_color(THEME.key).get_fg_color(),
            Some(ClapColor::Ansi(AnsiColor::BrightCyan))
        );
    }

    #[test]
    fn test_appendix_lists_every_environment_variable() {
        let appendix = render_appendix(false);
        for (key, _) in ENVIRONMENT_VARIABLES {
            assert!(appendix.contains(key), "missing {key}");
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
