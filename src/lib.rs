//! # Prompt Gallery
//!
//! Batch AI image generation from prompt files.
//!
//! A thin HTTP server forwards each prompt to a hosted image-generation
//! API, stores the returned bytes on local disk, and answers with a URL.
//! The `pgen` CLI reads prompts from `.txt`, `.csv`, or `.xlsx` files,
//! drives the server one prompt at a time, and can bundle the results into
//! a zip archive.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ Prompt file  │──▶│    Batch     │──▶│  POST /api/generate  │
//! │ txt/csv/xlsx │   │ (sequential) │   │  provider → store    │
//! └──────────────┘   └──────┬───────┘   └──────────┬───────────┘
//!                           │ descriptors          │ /images/*
//!                           ▼                      ▼
//!                    ┌──────────────┐       ┌──────────────┐
//!                    │   Archive    │◀──────│  Blob store  │
//!                    │ (parallel)   │ fetch │  (disk)      │
//!                    └──────────────┘       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! STABILITY_API_KEY=sk-... pgen serve
//! pgen parse prompts.xlsx
//! pgen batch prompts.txt --zip generated-images.zip
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Prompts, descriptors, wire bodies, session gallery |
//! | [`provider`] | Upstream image-generation client |
//! | [`blob_store`] | Write-once image storage |
//! | [`generate`] | Generation endpoint logic |
//! | [`server`] | HTTP server |
//! | [`client`] | HTTP client for the server |
//! | [`prompts`] | Prompt extraction from files |
//! | [`batch`] | Sequential batch orchestration |
//! | [`progress`] | Batch progress reporting |
//! | [`archive`] | Parallel fetch and zip packaging |

pub mod archive;
pub mod batch;
pub mod blob_store;
pub mod client;
pub mod config;
pub mod generate;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod server;
