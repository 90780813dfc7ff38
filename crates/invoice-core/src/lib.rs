//! # invoice-core
//!
//! Invoice records and the durable invoice cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      InvoiceStore                         │
//! │  ┌──────────────────┐        ┌────────────────────────┐  │
//! │  │  Invoice Cache   │──────▶ │   StoreBackend         │  │
//! │  │  (id -> record)  │ write  │   (JSON file / memory) │  │
//! │  └──────────────────┘        └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache is rebuilt from the backend at startup and every insert
//! rewrites the whole document. The store is an explicitly owned value;
//! share it by `Arc` with whatever needs it.

pub mod backend;
pub mod error;
pub mod invoice;
pub mod store;

pub use backend::{JsonFileBackend, MemoryBackend, StoreBackend};
pub use error::{CoreError, Result};
pub use invoice::InvoiceRecord;
pub use store::InvoiceStore;
