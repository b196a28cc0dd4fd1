//! # a11y-harness
//!
//! Accessibility audit, remediation and page chat for arbitrary HTML.
//!
//! This crate wires the pure pipeline in [`a11y_harness_core`] to the outside
//! world: TOML configuration, page fetches, OpenAI/Ollama clients, SQLite
//! persistence, the `a11y` CLI and an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────────┐   ┌──────────┐
//! │  Fetch   │──▶│  extract → audit → fix →    │──▶│  SQLite  │
//! │ URL/HTML │   │  embed (→ summarize)        │   │ pages+vec│
//! └──────────┘   └─────────────────────────────┘   └────┬─────┘
//!                                                       │
//!                      ┌────────────────────────────────┤
//!                      ▼                                ▼
//!                 ┌──────────┐                    ┌──────────┐
//!                 │   CLI    │                    │   HTTP   │
//!                 │  (a11y)  │                    │  (axum)  │
//!                 └──────────┘                    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! a11y init                                  # create database
//! a11y process https://example.org/          # audit + fix + index
//! a11y issues <page_id>                      # list detected issues
//! a11y output <page_id> > fixed.html         # repaired document
//! a11y chat <page_id> "What is this page about?"
//! a11y serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ai`] | OpenAI, Ollama and disabled AI clients |
//! | [`fetch`] | Page fetch over HTTP(S) |
//! | [`pipeline`] | Page processing |
//! | [`chat`] | Page chat |
//! | [`output`] | Repaired HTML and issue listings |
//! | [`server`] | HTTP API |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ai;
pub mod chat;
pub mod config;
pub mod db;
pub mod fetch;
pub mod migrate;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
