use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Table};
use serde::Serialize;

use crate::context::{ConfigContext, ENV_VAR_REFERENCE, ValidationReport, write_example_config};
use crate::examples::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay};
use crate::theme::ICONS;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Setup",
        commands: &[
            "graphdiff config init                 # Write an example graphdiff.toml",
            "graphdiff config init --force         # Overwrite an existing file",
        ],
    },
    ExampleGroup {
        title: "Inspect",
        commands: &[
            "graphdiff config list                 # List endpoint profiles",
            "graphdiff config show remote          # Show one profile (password masked)",
            "graphdiff config validate             # Check required fields, URIs and passwords",
        ],
    },
];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write an example config file
    #[command(name = "init")]
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List endpoint profiles
    #[command(name = "list")]
    List,

    /// Show one endpoint profile
    #[command(name = "show")]
    Show {
        /// Profile name
        environment: String,
    },

    /// Validate the config file
    #[command(name = "validate")]
    Validate,
}

#[derive(Serialize)]
struct EnvironmentRow {
    name: String,
    uri: String,
    user: String,
    description: Option<String>,
}

#[derive(Serialize)]
#[serde(transparent)]
struct EnvironmentList(Vec<EnvironmentRow>);

impl TableDisplay for EnvironmentList {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let output = OutputManager::new(options.clone());
        let mut table = output.create_table();
        output.add_table_header(&mut table, vec!["Name", "URI", "User", "Description"]);
        for row in &self.0 {
            table.add_row(vec![
                Cell::new(&row.name),
                Cell::new(&row.uri),
                Cell::new(&row.user),
                Cell::new(row.description.as_deref().unwrap_or("")),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let names: Vec<&str> = self.0.iter().map(|row| row.name.as_str()).collect();
        names.join(" ")
    }
}

impl TableDisplay for ValidationReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let output = OutputManager::new(options.clone());
        let mut table = output.create_table();
        output.add_table_header(&mut table, vec!["", "Environment", "Issue"]);
        for issue in &self.errors {
            table.add_row(vec![Cell::new(ICONS.error), Cell::new(&issue.environment), Cell::new(&issue.message)]);
        }
        for issue in &self.warnings {
            table.add_row(vec![Cell::new(ICONS.warning), Cell::new(&issue.environment), Cell::new(&issue.message)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "valid={} errors={} warnings={}",
            self.is_valid(),
            self.errors.len(),
            self.warnings.len()
        )
    }
}

/// Returns false when `validate` finds errors.
pub async fn handle_config_commands(command: ConfigCommands, config_path: &Path, output: &OutputManager) -> Result<bool> {
    match command {
        ConfigCommands::Init { force } => {
            write_example_config(config_path, force)?;
            output.success(&format!("Created {}", config_path.display()));
            output.info("Edit the endpoint profiles, then run 'graphdiff config validate'");
        }
        ConfigCommands::List => {
            let ctx = ConfigContext::load(config_path)?;
            if !ctx.exists() {
                output.warning(&format!("No config file at {}", config_path.display()));
                output.info("Run 'graphdiff config init' to create one.");
                return Ok(true);
            }
            let rows = ctx
                .environments()
                .into_iter()
                .map(|(name, profile)| EnvironmentRow {
                    name: name.to_string(),
                    uri: profile.uri.clone(),
                    user: profile.user.clone(),
                    description: profile.description.clone(),
                })
                .collect();
            output.display(&EnvironmentList(rows))?;
        }
        ConfigCommands::Show { environment } => {
            let ctx = ConfigContext::load(config_path)?;
            let profile = ctx.profile(&environment)?;
            if output.is_json() {
                output.display_json(profile)?;
                return Ok(true);
            }
            output.heading(&format!("Environment: {environment}"));
            output.key_value("URI", &profile.uri);
            output.key_value("User", &profile.user);
            let password = if profile.password.is_empty() {
                "(not set)".to_string()
            } else if ENV_VAR_REFERENCE.is_match(&profile.password) {
                format!("*** (from {})", profile.password)
            } else {
                "***".to_string()
            };
            output.key_value("Password", &password);
            if let Some(description) = &profile.description {
                output.key_value("Description", description);
            }
        }
        ConfigCommands::Validate => {
            let ctx = ConfigContext::load(config_path)?;
            let report = ctx.validate();
            if report.errors.is_empty() && report.warnings.is_empty() {
                output.success(&format!("{} is valid", config_path.display()));
            } else {
                output.display(&report)?;
                if report.is_valid() {
                    output.warning(&format!("{} is valid with warnings", config_path.display()));
                } else {
                    output.error(&format!("{} has errors", config_path.display()));
                }
            }
            return Ok(report.is_valid());
        }
    }

    Ok(true)
}
