//! # Lore
//!
//! A local-first hybrid retrieval engine for personal knowledge.
//!
//! Lore indexes notes, documents, and message archives into collections,
//! chunks and embeds them, and answers queries by fusing semantic (vector)
//! and keyword (FTS5) retrieval with Reciprocal Rank Fusion. Everything
//! lives in one SQLite file; the only external dependency is a local
//! embedding service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Parsers /  │──▶│   Indexer     │──▶│  SQLite    │
//! │  Scanner    │   │ Chunk+Embed  │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └────┬──────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │  (lore)  │       │  (MCP)   │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lore init                          # create database
//! lore index notes ~/vault          # scan and index a directory
//! lore search "sqlite wal tuning"   # hybrid search
//! lore serve                        # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`parser`] | File-format parsers |
//! | [`scan`] | Filesystem scanner |
//! | [`chunker`] | Content-class-aware chunking |
//! | [`embedding`] | Embedding client and vector math |
//! | [`indexer`] | Incremental indexing coordinator |
//! | [`search`] | Hybrid search with rank fusion |
//! | [`store`] | Dual index store |
//! | [`server`] | MCP HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod scan;
pub mod search;
pub mod server;
pub mod store;
