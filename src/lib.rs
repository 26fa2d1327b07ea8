//! # Corpus Analysis
//!
//! Schema-constrained qualitative analysis of a document corpus through a
//! hosted completion service.
//!
//! A run collects documents (PDF bytes, text files, RIS bibliographic
//! records), composes one instruction from the selected analysis modes,
//! sends the whole corpus in a single completion call constrained by a
//! response schema, and validates the answer into typed records. Those
//! records are flattened into tables and exported as CSV/TSV; systematic
//! mapping answers are additionally pivoted into a document × question
//! grid and can be synthesised across documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────┐
//! │   Corpus    │──▶│   Analysis    │──▶│ AnalysisResult │
//! │ PDF/TXT/RIS │   │ prompt+schema │   │  typed records │
//! └─────────────┘   └──────┬───────┘   └───────┬────────┘
//!                          │ one call          │
//!                          ▼                   ▼
//!                  ┌───────────────┐   ┌───────────────┐
//!                  │  Completion   │   │ Tables/Export │
//!                  │ Gemini/OpenAI │   │ CSV, TSV, wide │
//!                  └───────────────┘   └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! qca analyze --mode systematic --question "What is the study's objective?" \
//!     --dir ./papers --out ./out
//! qca synthesize --result ./out/result.json --question "What is the study's objective?"
//! qca serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Requests, modes and result records |
//! | [`error`] | Analysis error taxonomy |
//! | [`config`] | TOML configuration |
//! | [`corpus`] | Document collection and the size ceiling |
//! | [`extract`] | PDF → text for text-only providers |
//! | [`ris`] | RIS parser |
//! | [`openaccess`] | DOI → open-access PDF import |
//! | [`prompt`] | Instruction composition |
//! | [`schema`] | Response schemas |
//! | [`completion`] | Completion service clients |
//! | [`analysis`] | One analysis run |
//! | [`tables`] | Flattening and pivoting |
//! | [`export`] | CSV / TSV output |
//! | [`synthesis`] | Cross-document synthesis |
//! | [`session`] | Per-session state for the HTTP API |
//! | [`progress`] | Elapsed-time progress |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod analysis;
pub mod commands;
pub mod completion;
pub mod config;
pub mod corpus;
pub mod error;
pub mod export;
pub mod extract;
pub mod models;
pub mod openaccess;
pub mod progress;
pub mod prompt;
pub mod ris;
pub mod schema;
pub mod server;
pub mod session;
pub mod synthesis;
pub mod tables;
