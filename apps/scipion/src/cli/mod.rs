//! # Scipion CLI Module
//!
//! This module implements the command line interface over a project
//! directory.
//!
//! ## Available Commands
//!
//! - `init` - Create a new project
//! - `status` - Show project status
//! - `list` - List runs, or stored objects of a class
//! - `show` - Print a stored object tree
//! - `graph` - Print the runs graph
//! - `layout` - Place graph nodes that have no position yet
//! - `node` - Edit the position of a graph node
//! - `label` - Set or clear the label of a run
//! - `delete` - Delete a run
//! - `export` - Export the project store in canonical format
//! - `import` - Import a canonical export into an empty project
//! - `hash` - Compute checksum and BLAKE3 hash of the project store

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use scipion_core::ScipionError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Scipion project store
///
/// Inspect and edit the runs, settings and graph of a Scipion project.
#[derive(Parser, Debug)]
#[command(name = "scipion")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory (overrides config and SCIPION_PROJECT)
    #[arg(short = 'P', long, global = true)]
    pub project: Option<PathBuf>,

    /// Config file (default: ./scipion.toml if present)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new project
    Init {
        /// Replace the stores of an existing project
        #[arg(short, long)]
        force: bool,
    },

    /// Show project status
    Status,

    /// List runs, or every stored object of a class
    List {
        /// Class name (default: all runs)
        #[arg(short, long)]
        class: Option<String>,

        /// Include subclasses of the class
        #[arg(short, long)]
        subclasses: bool,
    },

    /// Print a stored object tree
    Show {
        /// Object id
        id: i64,
    },

    /// Print the runs graph
    Graph {
        /// Print Graphviz dot instead of levels
        #[arg(long)]
        dot: bool,
    },

    /// Place graph nodes that have no position yet
    Layout,

    /// Edit the position of a graph node (0 is the project node)
    Node {
        /// Node id (run id)
        id: i64,

        /// Horizontal position
        #[arg(short, long)]
        x: Option<i64>,

        /// Vertical position
        #[arg(short, long)]
        y: Option<i64>,

        /// Mark the node as selected or not
        #[arg(long)]
        selected: Option<bool>,
    },

    /// Set or clear the label of a run
    Label {
        /// Run id
        id: i64,

        /// New label (clears the label when omitted)
        label: Option<String>,
    },

    /// Delete a run with its tree and relations
    Delete {
        /// Run id
        id: i64,
    },

    /// Export the project store in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a canonical export into an empty project
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute checksum and BLAKE3 hash of the project store
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and the loaded configuration.
pub fn execute(cli: Cli, config: &Config) -> Result<(), ScipionError> {
    let ctx = Context {
        project: config.project_path(cli.project.as_deref()),
        registry: config.registry(),
        json_mode: cli.json_mode,
    };
    if cli.verbose {
        tracing::debug!(project = %ctx.project.display(), "using project");
    }

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Status) => cmd_status(&ctx),
        Some(Commands::List { class, subclasses }) => cmd_list(&ctx, class.as_deref(), subclasses),
        Some(Commands::Show { id }) => cmd_show(&ctx, id),
        Some(Commands::Graph { dot }) => cmd_graph(&ctx, dot),
        Some(Commands::Layout) => cmd_layout(&ctx),
        Some(Commands::Node { id, x, y, selected }) => cmd_node(&ctx, id, x, y, selected),
        Some(Commands::Label { id, label }) => cmd_label(&ctx, id, label),
        Some(Commands::Delete { id }) => cmd_delete(&ctx, id),
        Some(Commands::Export { output }) => cmd_export(&ctx, &output),
        Some(Commands::Import { input }) => cmd_import(&ctx, &input),
        Some(Commands::Hash) => cmd_hash(&ctx),
        None => {
            // No subcommand - show status by default
            cmd_status(&ctx)
        }
    }
}
