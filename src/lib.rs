// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod aggregate;
pub mod api;
pub mod batch;
pub mod columns;
pub mod config;
pub mod heartbeat;
pub mod history;
pub mod metrics;
pub mod saturation;
pub mod station;
pub mod table;
pub mod transport;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::batch::{BatchError, BatchUpdater};
pub use crate::heartbeat::{CycleOutcome, Heartbeat, HeartbeatCfg};
pub use crate::station::{
    BatchUpdateItem, MemoryRegistry, StationRegistry, StationSnapshot, StationThresholds,
};
pub use crate::table::{parse_table, Layout, ParsedTable, RawRecord};
pub use crate::transport::{FileTransport, FtpTransport, TransportError};
