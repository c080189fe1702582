//! Receiver Service
//!
//! Record ingestion and query service. Clients POST loosely structured,
//! log-like records; the service stamps each one with a receipt time, assigns
//! it a unique time-ordered key and persists it as a JSON object on either the
//! local filesystem or an S3 bucket. A GET endpoint interprets `action` query
//! parameters to list keys or dump records as text or CSV.
//!
//! ## Architecture
//!
//! ```text
//!  POST msg=...                                   GET ?action=...
//!       │                                               │
//!       ▼                                               ▼
//! ┌──────────────┐   ┌──────────────┐          ┌──────────────────┐
//! │ Ingestion    │──▶│ Record       │◀─────────│ Action           │
//! │ Pipeline     │   │ Codec        │          │ Dispatcher       │
//! └──────────────┘   └──────────────┘          └──────────────────┘
//!       │   │                                        │
//!       │   ▼                                        │
//!       │ ┌──────────────┐                           │
//!       │ │ Key          │                           │
//!       │ │ Generator    │                           │
//!       │ └──────────────┘                           │
//!       ▼                                            ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ StorageBackend:  LocalBackend (files) | S3Backend (bucket) │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod key;
pub mod storage;

pub use api::{create_router, start_api_server, AppState};
pub use codec::{decode, encode_csv_row, encode_text, DecodeError, Record};
pub use config::Config;
pub use dispatch::{ActionDispatcher, QueryParams, QueryValue};
pub use ingest::{ingest, IngestError};
pub use key::{generate_key, FixedClock, SystemClock, TimeSource};
pub use storage::{LocalBackend, S3Backend, StorageBackend, StorageError};
