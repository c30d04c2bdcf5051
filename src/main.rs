use std::{fs, path::{Path, PathBuf}, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Level;

use notesearch::commands::indexer::{index_all, index_course};
use notesearch::config::{Config, EngineConfig};
use notesearch::util::{sonic::SonicBackend, tantivy_index::TantivyBackend};
use notesearch::{index_text, normalize, Catalog, SearchBackend, SearchService};

#[derive(Parser)]
#[command(name = "notesearch", about = "Index and search HTML lecture notes", version)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push every page in the catalog to the search engine
    Index {
        /// Only index this course (code or alias)
        #[arg(long)]
        course: Option<String>,
    },

    /// Run a query and print highlighted results
    Search {
        query: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the display text of an HTML file
    Normalize { file: PathBuf },

    /// Print the text that would be pushed to the engine for an HTML file
    IndexText { file: PathBuf },

    /// List the courses in the catalog
    Courses,
}

fn open_backend(config: &Config) -> anyhow::Result<Arc<dyn SearchBackend>> {
    let backend: Arc<dyn SearchBackend> = match &config.engine {
        EngineConfig::Sonic(sonic) => Arc::new(
            SonicBackend::new(&sonic.host, sonic.port, &sonic.password, config.index_concurrency)
                .with_timeout(Duration::from_millis(sonic.timeout_ms)),
        ),
        EngineConfig::Tantivy(tantivy) => Arc::new(
            TantivyBackend::open(&tantivy.index_dir)
                .with_context(|| format!("opening index at {}", tantivy.index_dir.display()))?,
        ),
    };
    Ok(backend)
}

fn read(file: &Path) -> anyhow::Result<String> {
    fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Normalize { file } => println!("{}", normalize(&read(&file)?)),
        Command::IndexText { file } => println!("{}", index_text(&read(&file)?)),
        Command::Courses => {
            for course in Catalog::new(&config.base_folder).courses()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    course.part,
                    course.term,
                    course.code,
                    course.name,
                    course.html_url()
                );
            }
        }
        Command::Index { course } => {
            let backend = open_backend(&config)?;
            let catalog = Catalog::new(&config.base_folder);
            let report = match course {
                Some(name) => index_course(&catalog, &name, backend.as_ref(), &config).await,
                None => index_all(&catalog, backend.as_ref(), &config).await,
            };
            backend.close().await?;
            let report = report?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failures.is_empty() {
                anyhow::bail!("{} document(s) failed to index", report.failures.len());
            }
        }
        Command::Search { query, json } => {
            let backend = open_backend(&config)?;
            let service = SearchService::new(config, backend.clone())?;
            let response = service.search(&query).await;
            backend.close().await?;
            let response = response?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                for result in &response.results {
                    println!("{}\n  {}\n  {}\n", result.title, result.href, result.highlighted);
                }
                for skipped in &response.skipped {
                    eprintln!("skipped {}: {}", skipped.key, skipped.reason);
                }
            }
        }
    }
    Ok(())
}
