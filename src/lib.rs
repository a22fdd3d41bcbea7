//! # law_rag (library root)
//!
//! Retrieval-augmented analysis of criminal cases. The core is a local knowledge base of
//! statutes and precedent cases that can be searched by meaning:
//!
//! - JSON collections on disk (`store`), with lenient record types (`records`).
//! - An exact inner-product vector index with a checksummed file format (`index`).
//! - Pluggable text encoders (`embedding`): a Candle MiniLM model or an offline hashing
//!   encoder.
//! - The engine that keeps index and metadata aligned, rebuilds on drift, and answers
//!   queries (`knowledge`, `query`).
//!
//! Around it sits an LLM-driven pipeline (`llm`, `agents`, `analyzer`) that structures a
//! case description, pulls the relevant knowledge, analyses four dimensions of the case
//! and drafts a decision. The `lawrag` binary wires both halves to a CLI (`commands`).
//!
//! ## Configuration
//! `lawrag` reads `config.yaml` from the per-platform configuration directory (see
//! [`config_dir`]); `lawrag init` writes a default one.
//!
//! ## Modules
//! - [`agents`], [`analyzer`], [`commands`], [`config`], [`embedding`], [`error`],
//!   [`index`], [`knowledge`], [`llm`], [`query`], [`records`], [`store`]

use directories::ProjectDirs;
use std::{error::Error, path::PathBuf};

pub mod agents;
pub mod analyzer;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod knowledge;
pub mod llm;
pub mod query;
pub mod records;
pub mod store;

/// Return the per-platform configuration directory used by `lawrag`.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "law-rag", "lawrag")`, e.g. `~/.config/lawrag` on Linux.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined.
///
/// # Examples
/// ```rust
/// let cfg = law_rag::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "law-rag", "lawrag")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
