//! Main module for the `lawrag` CLI application.
//!
//! It handles command parsing, configuration loading and initialization, then runs the
//! requested knowledge-base operation or the full case analysis.
//!
//! # Examples
//!
//! ```sh
//! lawrag init
//! lawrag rebuild
//! lawrag search "入户盗窃" -k 5
//! lawrag analyze "张某于2023年3月入户盗窃手机一部，价值3000元"
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{error::Error, fs, path::Path, sync::Arc};
use tracing::{debug, info};

use law_rag::{
    analyzer::CaseAnalyzer,
    commands::{Cli, Commands},
    config::{self, LawRagConfig},
    config_dir,
    embedding::EmbeddingProvider,
    knowledge::KnowledgeEngine,
    llm::LlmClient,
    records::{CaseRecord, StatutePatch},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Parses the command line, loads the configuration and executes the command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };

    if let Commands::Init = cli.command {
        debug!("Initializing configuration");
        return init(&config_path);
    }

    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(
        config_path
            .to_str()
            .ok_or("Configuration path is not valid UTF-8")?,
    )?;

    match cli.command {
        Commands::Init => {}
        Commands::Rebuild => {
            let engine = KnowledgeEngine::new(config.data.clone(), embedder(&config)?);
            let report = engine.rebuild_index()?;
            println!(
                "Indexed {} documents ({} statutes, {} cases, {} skipped)",
                report.documents(),
                report.statutes,
                report.cases,
                report.skipped
            );
        }
        Commands::Search { query, top_k, json } => {
            let engine = KnowledgeEngine::open(config.data.clone(), embedder(&config)?)?;
            let hits = engine.retrieve_knowledge(query, top_k.unwrap_or(config.top_k))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No matching knowledge");
            } else {
                for hit in &hits {
                    println!(
                        "{:>7.4}  {:<4}  {}",
                        hit.relevance_score,
                        hit.kind().as_str(),
                        hit.id()
                    );
                }
            }
        }
        Commands::AddCase {
            id,
            summary,
            verdict,
            articles,
            file,
        } => {
            let record = match file {
                Some(path) => serde_json::from_str::<CaseRecord>(&fs::read_to_string(path)?)?,
                None => CaseRecord::new(
                    id.ok_or("--id is required without --file")?,
                    summary.unwrap_or_default(),
                    verdict.unwrap_or_default(),
                    articles.unwrap_or_default(),
                ),
            };
            let engine = KnowledgeEngine::open(config.data.clone(), embedder(&config)?)?;
            let report = engine.add_new_case(record)?;
            println!("Case added; {} documents indexed", report.documents());
        }
        Commands::UpdateLaw {
            article_id,
            text,
            explanation,
        } => {
            let mut patch = StatutePatch::default();
            if let Some(text) = text {
                patch = patch.with_article_text(text);
            }
            if let Some(explanation) = explanation {
                patch = patch.with_explanation(explanation);
            }
            if patch.is_empty() {
                return Err("Nothing to update: pass --text and/or --explanation".into());
            }

            let engine = KnowledgeEngine::open(config.data.clone(), embedder(&config)?)?;
            let update = engine.update_law_content(&article_id, patch)?;
            if update.matched {
                println!("Statute {article_id} updated");
            } else {
                println!("No statute with id {article_id}");
            }
        }
        Commands::Analyze { case, json } => {
            let engine = KnowledgeEngine::open(config.data.clone(), embedder(&config)?)?;
            let analyzer = CaseAnalyzer::new(Arc::new(engine), LlmClient::new(&config), config.top_k);
            let report = analyzer.analyze(&case).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.decision);
            }
        }
    }

    Ok(())
}

fn embedder(config: &LawRagConfig) -> Result<Box<dyn EmbeddingProvider>, Box<dyn Error>> {
    Ok(config.embedding.build_provider()?)
}

/// Writes a default configuration to `config_path` and creates empty statute and case
/// collections. Existing files are left alone.
///
/// # Errors
///
/// Returns an error if a directory or file cannot be created.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config = if config_path.exists() {
        info!("Config file already exists: {}", config_path.display());
        config::load_config(
            config_path
                .to_str()
                .ok_or("Configuration path is not valid UTF-8")?,
        )?
    } else {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        info!("Creating config file: {}", config_path.display());
        let config = LawRagConfig::with_api_key("CHANGEME");
        fs::write(config_path, serde_yaml::to_string(&config)?)?;
        config
    };

    for collection in [&config.data.laws, &config.data.cases] {
        if collection.exists() {
            continue;
        }
        if let Some(parent) = collection.parent() {
            fs::create_dir_all(parent)?;
        }
        info!("Creating empty collection: {}", collection.display());
        fs::write(collection, "[]\n")?;
    }

    Ok(())
}
