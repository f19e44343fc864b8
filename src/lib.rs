//! # spsync
//!
//! An incremental SharePoint content connector for a search index.
//!
//! spsync crawls site collections hierarchically (sites, then lists,
//! then list items with their attachments), resolves role assignments
//! into document-level permission labels, and pushes everything to a
//! search sink over HTTP. Time-windowed checkpoints keep incremental
//! cycles cheap; periodic full syncs re-observe the whole corpus and
//! reconcile deletions against a persisted id registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ SharePoint  │──▶│ Coordinator   │──▶│   Sink     │
//! │  REST API   │   │ W crawlers    │   │ documents  │
//! └─────────────┘   │ per window    │   │ perms      │
//!                   └──────┬───────┘   │ deletions  │
//!                          │           └───────────┘
//!             ┌────────────┴────────────┐
//!             ▼                         ▼
//!       ┌───────────┐            ┌───────────┐
//!       │ checkpoint │            │  registry  │
//!       │  per coll  │            │ global/del │
//!       └───────────┘            └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! spsync incremental --once     # one windowed cycle
//! spsync full_sync              # scheduled full re-sync loop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | SharePoint REST client |
//! | [`sink`] | Search index HTTP client |
//! | [`crawler`] | Hierarchical per-window crawl |
//! | [`coordinator`] | Cycle orchestration and fan-out |
//! | [`permissions`] | Role assignment resolution |
//! | [`extract`] | Attachment text extraction |
//! | [`schema`] | Field projection rules |
//! | [`registry`] | Observed-id bookkeeping |
//! | [`checkpoint`] | Per-collection sync cursors |
//! | [`windows`] | Time-window partitioning |
//! | [`state`] | Registry persistence |
//! | [`error`] | Typed per-call errors |

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod models;
pub mod permissions;
pub mod registry;
pub mod schema;
pub mod sink;
pub mod source;
pub mod state;
pub mod windows;
