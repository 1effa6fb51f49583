//! # Redmine Knowledge Agent
//!
//! Mirrors Redmine issues and wiki pages into Markdown files for retrieval
//! (RAG) indexing.
//!
//! Textile bodies are converted to Markdown, attachments are downloaded and
//! their text extracted (OCR for images, text for PDF, Word, and
//! spreadsheets), and each issue or wiki page becomes one Markdown document
//! with YAML front matter.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Redmine  │──▶│  Attachment  │──▶│  Processors  │──▶│  Markdown  │
//! │ REST API │   │  download    │   │ OCR/PDF/DOCX │   │  generator │
//! └──────────┘   └──────────────┘   │ XLSX/CSV     │   └─────┬──────┘
//!                                   └──────────────┘         ▼
//!                                                   <out>/<project>/*.md
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! redmine-ka list-projects
//! redmine-ka fetch --projects demo
//! redmine-ka convert-textile notes.textile -o notes.md
//! redmine-ka extract report.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and Redmine payloads |
//! | [`converter`] | Textile to Markdown conversion |
//! | [`extract`] | OCR, PDF, Word, workbook, and CSV engines |
//! | [`processors`] | Per-type attachment processors |
//! | [`factory`] | MIME-type dispatch to processors |
//! | [`generator`] | Markdown document assembly |
//! | [`client`] | Redmine REST client |
//! | [`fetch`] | Fetch pipeline |
//! | [`logging`] | Log subscriber setup |

pub mod client;
pub mod config;
pub mod converter;
pub mod extract;
pub mod factory;
pub mod fetch;
pub mod generator;
pub mod logging;
pub mod models;
pub mod processors;
