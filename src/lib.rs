//! # Syllabus
//!
//! A course-authoring backend: ingests directory-structured courses
//! (metadata, chapters, lessons, author bios) into a schemaless document
//! store on SQLite and serves course navigation from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ course dir  │──▶│  parser  │──▶│    loader    │──▶│ DocumentStore│
//! │ yml + md    │   │ validate │   │ unit of work │   │ SQLite / mem │
//! └─────────────┘   └──────────┘   │ + outline    │   └──────┬───────┘
//!        ▲                         └──────────────┘          │
//!        │ notify                                            ▼
//!   ┌─────────┐                                        ┌──────────┐
//!   │  watch  │                                        │ courses  │
//!   └─────────┘                                        │ (read)   │
//!                                                      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! syl new-site ./site              # config, database and assets dir
//! syl init                          # create database
//! syl load ./courses/alpha          # ingest a course directory
//! syl load ./courses                # ingest every course under it
//! syl show alpha                    # outline with positions
//! syl lesson alpha uno-module moonu # lesson with previous/next
//! syl query lesson --where module=uno-module
//! syl watch ./courses/alpha         # reload on change
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`query`] | Predicate query builder |
//! | [`models`] | Schemaless document |
//! | [`doctypes`] | Typed doctypes and the registry |
//! | [`store`] | Store contract, SQLite and in-memory backends |
//! | [`cache`] | LRU read cache with per-doctype invalidation |
//! | [`parser`] | Course directory parsing and validation |
//! | [`outline`] | Outline linking |
//! | [`loader`] | Ingestion pipeline |
//! | [`courses`] | Read side and CLI printers |
//! | [`watch`] | Debounced directory watching |
//! | [`progress`] | Load progress reporting |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`error`] | Error taxonomy |

pub mod cache;
pub mod config;
pub mod courses;
pub mod db;
pub mod doctypes;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod outline;
pub mod parser;
pub mod progress;
pub mod query;
pub mod store;
pub mod watch;

pub use error::{Error, Result};
