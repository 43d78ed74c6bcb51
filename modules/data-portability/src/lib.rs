//! Data portability: user-initiated exports of personal data.

pub mod models;
pub mod service;
pub mod store;

pub use models::{CreateExportRequest, ExportFormat, ExportRequest, ExportStatus};
pub use service::ExportService;
pub use store::{ExportStore, InMemoryExportStore};
