//! # a11y-harness core
//!
//! Pipeline logic for auditing and repairing the accessibility of HTML
//! pages and answering questions about them:
//!
//! ```text
//! HTML ─▶ dom ─▶ extract ─▶ audit ─▶ remediate ─▶ repaired HTML
//!                   │
//!                   └──▶ index ─▶ store ─▶ retrieve ─▶ chat
//! ```
//!
//! This crate contains no tokio, sqlx, HTTP client or filesystem code.
//! Model providers come in through [`ai::AiClient`] and persistence through
//! [`store::Store`]; the `a11y-harness` app crate supplies both.

pub mod ai;
pub mod audit;
pub mod chat;
pub mod dom;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod models;
pub mod remediate;
pub mod retrieve;
pub mod store;
