//! # Lead Funnel
//!
//! Backend for an AI consultancy marketing site: lead capture, an AI
//! readiness assessment, a document-grounded chat assistant and a small
//! admin CMS, served as a JSON HTTP API over SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Browser   │──▶│  axum router │──▶│  SQLite  │
//! │  (site)    │   │  + handlers  │   │  (sqlx)  │
//! └────────────┘   └──────┬───────┘   └──────────┘
//!                         │
//!            ┌────────────┼────────────┐
//!            ▼            ▼            ▼
//!      ┌──────────┐ ┌──────────┐ ┌──────────┐
//!      │  OpenAI  │ │  OpenAI  │ │  Resend  │
//!      │   chat   │ │ embedding│ │  email   │
//!      └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! funnel hash-password          # produce [auth] password_hash
//! funnel init                   # create database
//! funnel serve                  # start HTTP server
//! funnel stats                  # print counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Persisted records |
//! | [`leads`] | Contact form and lead upsert |
//! | [`assessment`] | Questionnaire, scoring, summaries |
//! | [`chat`] | Chat assistant |
//! | [`documents`] | Upload, chunking, similarity search |
//! | [`auth`] | Admin login and sessions |
//! | [`server`] | HTTP router |
//! | [`admin`] | Admin CMS routes |

pub mod access;
pub mod admin;
pub mod assessment;
pub mod auth;
pub mod branding;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod leads;
pub mod llm;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod server;
pub mod stats;
pub mod validate;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` sets the filter (default
/// `info`); `FUNNEL_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let log_format = std::env::var("FUNNEL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
