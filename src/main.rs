//! # Syllabus CLI (`syl`)
//!
//! The `syl` binary loads course directories into the document store and
//! answers navigation questions about them.
//!
//! ## Usage
//!
//! ```bash
//! syl --config ./syllabus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `syl init` | Create the SQLite database and its schema |
//! | `syl new-site <dir>` | Create a site directory with config, database and assets |
//! | `syl load <dir>` | Ingest a course directory, or every course under a directory |
//! | `syl watch <dir>` | Ingest, then re-ingest on changes |
//! | `syl courses` | List loaded courses |
//! | `syl show <course>` | Course details and outline |
//! | `syl lesson <course> <module> <lesson>` | Lesson with position and neighbors |
//! | `syl version <course>` | Current version token |
//! | `syl query <doctype>` | Matching documents as JSON lines |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use syllabus::config::{self, Config};
use syllabus::courses;
use syllabus::doctypes::DoctypeRegistry;
use syllabus::loader::{print_report, CourseLoader};
use syllabus::migrate;
use syllabus::parser;
use syllabus::progress::ProgressMode;
use syllabus::store::SqliteStore;
use syllabus::watch;

/// Syllabus CLI: load course directories and navigate them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "syl",
    about = "Syllabus: course directories in, navigable documents out",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./syllabus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Create a new site directory: config, database and assets. Fails if
    /// the directory exists.
    NewSite { dir: PathBuf },

    /// Ingest a course directory (or its definition file). A directory
    /// without a definition file loads every course directory inside it.
    Load {
        dir: PathBuf,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to
        /// `human` on a terminal, otherwise `off`.
        #[arg(long, value_parser = parse_progress)]
        progress: Option<ProgressMode>,
    },

    /// Ingest a course directory, then re-ingest after each burst of changes.
    Watch { dir: PathBuf },

    /// List loaded courses.
    Courses,

    /// Show a course with its instructors and outline.
    Show { course: String },

    /// Show a lesson with its position, previous and next lessons.
    Lesson {
        course: String,
        module: String,
        lesson: String,
    },

    /// Print the current version token of a course. Exits 1 if none.
    Version { course: String },

    /// Print documents of a doctype as JSON lines.
    Query {
        doctype: String,

        /// Field constraint `name=value`; value is JSON if it parses,
        /// otherwise a string. Repeatable, ANDed.
        #[arg(long = "where", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        offset: Option<u64>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}': off, human or json", s))
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let registry = Arc::new(DoctypeRegistry::course_doctypes());
    let store = SqliteStore::open(cfg, registry).await?;
    migrate::migrate_pool(store.pool()).await?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("syllabus=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::NewSite { dir } => {
            let site = config::new_site(&dir)?;
            migrate::run_migrations(&site).await?;
            println!("New site created at {}", dir.display());
        }
        Commands::Load { dir, progress } => {
            let dirs = match parser::course_dirs(&dir, &cfg.content) {
                Ok(dirs) => dirs,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            let store = open_store(&cfg).await?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let loader = CourseLoader::new(store.clone(), cfg.content.clone())
                .with_progress(mode.reporter());
            let mut failed = 0;
            for course_dir in &dirs {
                match loader.load(course_dir).await {
                    Ok(report) => print_report(&report),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        failed += 1;
                    }
                }
            }
            store.close().await;
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Watch { dir } => {
            let store = open_store(&cfg).await?;
            let loader = CourseLoader::new(store.clone(), cfg.content.clone())
                .with_progress(ProgressMode::default_for_tty().reporter());
            watch::run_watch(&loader, &dir, &cfg).await?;
            store.close().await;
        }
        Commands::Courses => {
            let store = open_store(&cfg).await?;
            courses::run_courses(store.as_ref()).await?;
        }
        Commands::Show { course } => {
            let store = open_store(&cfg).await?;
            courses::run_show(store.as_ref(), &course).await?;
        }
        Commands::Lesson {
            course,
            module,
            lesson,
        } => {
            let store = open_store(&cfg).await?;
            courses::run_lesson(store.as_ref(), &course, &module, &lesson).await?;
        }
        Commands::Version { course } => {
            let store = open_store(&cfg).await?;
            courses::run_version(store.as_ref(), &course).await?;
        }
        Commands::Query {
            doctype,
            filters,
            limit,
            offset,
        } => {
            let store = open_store(&cfg).await?;
            courses::run_query(store.as_ref(), &doctype, &filters, limit, offset).await?;
        }
    }

    Ok(())
}
