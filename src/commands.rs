//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use law_rag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Search { query, .. } => println!("searching for {query}"),
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Configuration file. Defaults to `config.yaml` in the platform config directory.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration and empty statute and case collections.
    Init,

    /// Re-encode every statute and case and rewrite the index.
    Rebuild,

    /// Search the knowledge base.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        /// Number of results. Defaults to `top_k` from the configuration.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add a precedent case and rebuild the index.
    ///
    /// Either pass every field as a flag, or `--file` with a JSON case record.
    #[clap(name = "add-case")]
    AddCase {
        #[arg(long, conflicts_with = "file")]
        id: Option<String>,

        #[arg(long, conflicts_with = "file")]
        summary: Option<String>,

        #[arg(long, conflicts_with = "file")]
        verdict: Option<String>,

        /// Applied statute articles.
        #[arg(long, conflicts_with = "file")]
        articles: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Update a statute's text or explanation and rebuild the index.
    #[clap(name = "update-law")]
    UpdateLaw {
        article_id: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        explanation: Option<String>,
    },

    /// Run the full analysis pipeline on a case description.
    #[clap(name = "analyze", alias = "a")]
    Analyze {
        case: String,

        /// Print the whole report as JSON instead of only the decision.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_arguments() {
        let cli = Cli::parse_from(["lawrag", "search", "入户盗窃", "-k", "3", "--json"]);
        match cli.command {
            Commands::Search { query, top_k, json } => {
                assert_eq!(query, "入户盗窃");
                assert_eq!(top_k, Some(3));
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["lawrag", "rebuild", "--config", "/tmp/c.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(cli.command, Commands::Rebuild));
    }

    #[test]
    fn test_add_case_file_conflicts_with_fields() {
        let result = Cli::try_parse_from([
            "lawrag", "add-case", "--id", "C1", "--file", "case.json",
        ]);
        assert!(result.is_err());
    }
}
