//! # Page Archiver
//!
//! Captures a durable record of a web page by submitting it to the Wayback
//! Machine (archive.org) and archive.today through a real Chrome browser, and
//! creating a short link for the archive.org capture.
//!
//! Neither service offers an API for this, so each one is driven through its
//! HTML forms. A submission can land on a fresh capture, an existing capture,
//! a CAPTCHA, a redirect page or a crashed navigation; every archiver turns
//! those into explicit steps and asks the operator when an existing capture
//! could stand in for one that failed.
//!
//! ## Features
//!
//! - **Concurrent archivers**: both services run at the same time on one browser
//! - **Bounded retries**: every wait and poll has an attempt ceiling
//! - **Operator confirmation**: ambiguous states become yes/no questions on a
//!   progress channel, answered with their default when running unattended
//! - **Renewal**: archive.today captures older than a year are refreshed
//! - **Short links**: v.gd-compatible, tolerant of taken aliases
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_archiver::{
//!     run_terminal, ArchiveOrchestrator, ArchiveRequest, BrowserSession, ChromeSession, Config,
//!     ProgressChannel,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let orchestrator = ArchiveOrchestrator::new(&config)?;
//!     let session = Arc::new(ChromeSession::launch(&config.browser, false).await?);
//!
//!     let (progress, events) = ProgressChannel::new(true);
//!     let terminal = tokio::spawn(run_terminal(events));
//!
//!     let request = ArchiveRequest::new("https://example.com");
//!     let result = orchestrator.run(request, session.clone(), &progress).await;
//!     drop(progress);
//!     terminal.await?;
//!     session.close().await?;
//!
//!     println!("{:?}", result?);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! page-archiver https://example.com --shorturl my_page --renew auto
//! page-archiver https://example.com --at-url none --yes --json
//! ```

/// Configuration, requests and results
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Bounded retry with backoff
pub mod retry;

/// Progress reporting and operator confirmation
pub mod progress;

/// Browser session interface and its Chrome implementation
pub mod browser;

/// archive.org client
pub mod archive_org;

/// archive.today client
pub mod archive_today;

/// Short-link generation
pub mod shorturl;

/// Concurrent archiver orchestration
pub mod orchestrator;

/// Command-line interface implementation
pub mod cli;

/// Per-service metrics
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use archive_org::*;
pub use archive_today::*;
pub use browser::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use orchestrator::*;
pub use progress::*;
pub use retry::*;
pub use shorturl::*;
pub use utils::*;
