//! Wikisense CLI: knowledge base build, example export and lookup.
//!
//! Usage:
//!   wikisense prepare <dump> <page.sql.gz> <categorylinks.sql.gz> --tokens dir [--db path]
//!   wikisense export --tokens dir --output dir -f name,ngram,c,ip,pos,lemma,sent [--db path]
//!   wikisense disambiguate [text] [--db path]
//!   wikisense stats [--db path]

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use wikisense::markup::{StaticTemplateExpander, TemplateExpander};
use wikisense::serving::format_spans;
use wikisense::tokenize::NamedDescriptor;
use wikisense::{
    run_build, run_export, BuildInputs, Config, Disambiguator, FeatureDescriptor, KnowledgeBase,
    PriorScorer, SenseLookup, SimpleTokenizer,
};

#[derive(Parser)]
#[command(
    name = "wikisense",
    version,
    about = "Wikipedia sense inventory and disambiguation engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite knowledge base
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the knowledge base and token shards from a dump
    Prepare {
        /// XML page dump (.xml or .xml.bz2)
        dump: PathBuf,
        /// `page` table SQL dump (.sql or .sql.gz)
        page_table: PathBuf,
        /// `categorylinks` table SQL dump (.sql or .sql.gz)
        categorylinks: PathBuf,
        /// Directory for the token shards
        #[arg(long)]
        tokens: PathBuf,
    },
    /// Write training examples for one or more feature descriptors
    Export {
        /// Directory holding the token shards
        #[arg(long)]
        tokens: PathBuf,
        /// Output directory
        #[arg(long)]
        output: PathBuf,
        /// Output descriptor: name,ngram,caseless,ignore_punct,pos,lemma,sentences
        #[arg(short = 'f', long = "format", required = true)]
        formats: Vec<String>,
    },
    /// Resolve ambiguous phrases in text (argument, piped stdin or interactive)
    Disambiguate {
        /// Text to disambiguate
        text: Option<String>,
        /// Feature descriptor JSON (defaults to unigrams)
        #[arg(long)]
        descriptor: Option<PathBuf>,
    },
    /// Show knowledge base table sizes
    Stats,
}

/// Get the default knowledge base path (~/.local/share/wikisense/wikisense.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let wikisense_dir = data_dir.join("wikisense");
    std::fs::create_dir_all(&wikisense_dir).ok();
    wikisense_dir.join("wikisense.db")
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path).map_err(|e| format!("Failed to load config: {}", e)),
        None => Ok(Config::default()),
    }
}

fn open_kb(db: Option<PathBuf>) -> Result<Arc<KnowledgeBase>, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    KnowledgeBase::open(&db_path)
        .map(Arc::new)
        .map_err(|e| format!("Failed to open knowledge base {}: {}", db_path.display(), e))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create tokio runtime: {}", e))
}

fn expander(config: &Config) -> Result<Arc<dyn TemplateExpander>, String> {
    match &config.pipeline.template_table {
        Some(path) => StaticTemplateExpander::load(path)
            .map(|expander| Arc::new(expander) as Arc<dyn TemplateExpander>)
            .map_err(|e| format!("Failed to load template table: {}", e)),
        None => Ok(Arc::new(StaticTemplateExpander::with_defaults())),
    }
}

fn cmd_prepare(kb: Arc<KnowledgeBase>, config: &Config, inputs: BuildInputs) -> Result<(), String> {
    let expander = expander(config)?;
    let stats = runtime()?
        .block_on(run_build(kb, inputs, &config.pipeline, Arc::new(SimpleTokenizer), expander))
        .map_err(|e| format!("Build failed: {}", e))?;

    println!("Pages:               {:>10}", stats.pages);
    println!("Articles:            {:>10}", stats.articles);
    println!("Redirects:           {:>10}", stats.redirects);
    println!("Paragraphs:          {:>10}", stats.paragraphs);
    println!("Links:               {:>10}", stats.resolved_links);
    println!("Disambiguation pages:{:>10}", stats.disambiguation_pages);
    println!("Sense groups:        {:>10}", stats.sense_groups);
    println!("Senses:              {:>10}", stats.senses);
    println!("Examples:            {:>10}", stats.examples);
    if stats.shortfalls > 0 {
        println!("Senses short of held-out examples: {}", stats.shortfalls);
    }
    Ok(())
}

fn cmd_export(
    kb: Arc<KnowledgeBase>,
    config: &Config,
    tokens: &Path,
    output: &Path,
    formats: &[String],
) -> Result<(), String> {
    let descriptors = formats
        .iter()
        .map(|format| format.parse::<NamedDescriptor>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    let stats = runtime()?
        .block_on(run_export(kb, tokens, output, &descriptors, &config.pipeline))
        .map_err(|e| format!("Export failed: {}", e))?;

    println!(
        "Wrote {} examples from {} paragraphs ({} skipped, {} paragraphs not found)",
        stats.written, stats.paragraphs, stats.skipped, stats.join_misses
    );
    Ok(())
}

fn print_results(text: &str, spans: &[wikisense::DisambiguatedSpan], seconds: f64) {
    println!();
    if spans.is_empty() {
        println!("Found no ambiguous words.");
    } else {
        println!("Found {} ambiguous words in {:.4} sec:", spans.len(), seconds);
        for line in format_spans(text, spans) {
            println!("{}", line);
        }
    }
    println!();
}

async fn disambiguate_once(disambiguator: &Disambiguator, text: &str) -> Result<(), String> {
    let started = Instant::now();
    let spans = disambiguator.disambiguate(text).await.map_err(|e| e.to_string())?;
    print_results(text, &spans, started.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_disambiguate(
    kb: Arc<KnowledgeBase>,
    config: &Config,
    text: Option<String>,
    descriptor: Option<&Path>,
) -> Result<(), String> {
    kb.ensure_complete().map_err(|e| e.to_string())?;
    let descriptor = match descriptor {
        Some(path) => FeatureDescriptor::load(path).map_err(|e| format!("Failed to load descriptor: {}", e))?,
        None => FeatureDescriptor::default(),
    };

    let piped = match text {
        Some(text) => Some(text),
        None if !io::stdin().is_terminal() => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| format!("Failed to read stdin: {}", e))?;
            Some(input)
        }
        None => None,
    };

    let rt = runtime()?;
    rt.block_on(async {
        let lookup: Arc<dyn SenseLookup> = kb;
        let disambiguator = Disambiguator::new(
            lookup,
            Arc::new(PriorScorer),
            Arc::new(SimpleTokenizer),
            descriptor,
            &config.serving,
        )
        .map_err(|e| e.to_string())?;

        match piped {
            Some(text) => disambiguate_once(&disambiguator, &text).await?,
            None => {
                println!();
                println!("Press ^D to exit.");
                println!();
                let stdin = io::stdin();
                loop {
                    print!("> ");
                    io::stdout().flush().ok();
                    let mut line = String::new();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => return Err(format!("Failed to read stdin: {}", e)),
                    }
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if line.is_empty() {
                        continue;
                    }
                    disambiguate_once(&disambiguator, &line).await?;
                }
                println!("Exiting...");
            }
        }

        disambiguator.shutdown().await.map_err(|e| e.to_string())
    })
}

fn cmd_stats(kb: &KnowledgeBase) -> Result<(), String> {
    let state = kb.build_state().map_err(|e| e.to_string())?;
    let built_at = kb.built_at().map_err(|e| e.to_string())?;
    let stats = kb.stats().map_err(|e| e.to_string())?;

    match (state, built_at) {
        (Some(state), Some(at)) => println!("Build:        {:?} ({})", state, at.to_rfc3339()),
        (Some(state), None) => println!("Build:        {:?}", state),
        (None, _) => println!("Build:        never run"),
    }
    let rows = [
        ("Articles", stats.articles),
        ("Redirects", stats.redirects),
        ("Disambig", stats.disambiguation_pages),
        ("Sections", stats.sections),
        ("Paragraphs", stats.paragraphs),
        ("Links", stats.links),
        ("Categories", stats.categories),
        ("Groups", stats.sense_groups),
        ("Targets", stats.targets),
        ("Senses", stats.senses),
        ("Alt titles", stats.alternative_group_titles),
        ("Examples", stats.examples),
    ];
    for (name, count) in rows {
        println!("{:<12}  {:>10}", name, count);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = load_config(cli.config.as_deref()).and_then(|config| {
        let kb = open_kb(cli.db)?;
        match cli.command {
            Commands::Prepare {
                dump,
                page_table,
                categorylinks,
                tokens,
            } => cmd_prepare(
                kb,
                &config,
                BuildInputs {
                    dump,
                    page_table,
                    categorylinks,
                    output_dir: tokens,
                },
            ),
            Commands::Export { tokens, output, formats } => cmd_export(kb, &config, &tokens, &output, &formats),
            Commands::Disambiguate { text, descriptor } => {
                cmd_disambiguate(kb, &config, text, descriptor.as_deref())
            }
            Commands::Stats => cmd_stats(&kb),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
