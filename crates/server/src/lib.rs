//! Webhook server for the studio-import pipeline
//!
//! Exposes the build-notification webhook consumed by the image-building
//! service and hands accepted notifications to
//! [`studio_import::ImportSupervisor`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Endpoints
//!
//! - `POST /` - build notification (form field `payload`, JSON)
//! - `GET /health` - liveness probe with in-flight import count
//! - `GET /imports` - imports still running
//!
//! # Configuration
//!
//! Read from an optional `server.toml` (or `.yaml`/`.json`) and
//! `STUDIO_IMPORT__*` environment variables, e.g.
//! `STUDIO_IMPORT__PORT=8080` or
//! `STUDIO_IMPORT__IMPORT__SCRATCH_ROOT=/var/tmp/imports`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
