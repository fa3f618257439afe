//! carpool — content-addressed block group store.
//!
//! Aggregates small content-addressed blocks into large sealed groups:
//! an append-only block log with a recoverable head, a per-group index
//! that hardens from a mutable KV store into a static hash table at seal
//! time, a fixed-arity Merkle DAG over the group, and a streaming CAR v1
//! archive whose root CID and piece commitment become the group's handle
//! for deal placement.

// Core modules
pub mod consts;
pub mod ctx;
pub mod error;
pub mod hash;
pub mod lock;
pub mod metrics;
pub mod util;

// Storage layers
pub mod blocklog; // src/blocklog/{mod,head,log}.rs
pub mod bsst; // src/bsst/{mod,build,reader}.rs
pub mod memindex;

// Packaging
pub mod cardata;
pub mod commp;

// Group lifecycle
pub mod group; // src/group/{mod,state,core,write,read,seal,dag,car}.rs
pub mod registry;
pub mod supervisor;

// Convenience re-exports
pub use ctx::Ctx;
pub use error::StoreError;
pub use group::{group_dir, raw_cid, Block, CommpResult, Group, GroupConfig, GroupState};
pub use metrics::{metrics_snapshot, MetricsSnapshot};
pub use registry::{GroupId, GroupRow, MemRegistry, Registry};
pub use supervisor::Supervisor;
