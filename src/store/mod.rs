//! Response store: where activated controls send captured records

mod memory;
mod record;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use record::{
    ExportBundle, ImportSummary, Record, RecordContext, StoreStats, DEFAULT_TITLE, EXPORT_VERSION,
};
pub use sqlite::SqliteStore;
pub use traits::{OpenStore, ResponseStore, StoreError, StoreResult};
