//! # LCLS Live Core Library
//!
//! This crate turns snapshots of control-system readings (PVs) into configuration
//! statements for an accelerator model, and decides per device whether its readings can
//! be trusted before they are applied. It also finds archived snapshots in a time-sharded
//! archive.
//!
//! ## Crate Structure
//!
//! - **`snapshot`**: `Snapshot`, an immutable map from PV name to raw value, and `PvValue`.
//! - **`cache`**: `PvCache`, an explicitly owned cache over a `SnapshotSource`.
//! - **`status`**: fault tables per status word, the decoder, and the usability verdict.
//! - **`klystron`**: station naming rules and PV name derivation.
//! - **`device`**: `DeviceStatus` resolution and the event-driven `DeviceMonitor`.
//! - **`datamap`**: the `DataMap` trait, `TabularDataMap`, `KlystronMap` and `DataMapSet`.
//! - **`builders`**: built-in datamaps for the copper linac beam paths.
//! - **`archive`**: shard lookup by timestamp and snapshot extraction.
//! - **`config`**: layered settings loaded with Figment.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the `LiveError` enum shared by all modules.

pub mod archive;
pub mod builders;
pub mod cache;
pub mod config;
pub mod datamap;
pub mod device;
pub mod error;
pub mod klystron;
pub mod logging;
pub mod snapshot;
pub mod status;

pub use datamap::{DataMap, Dialect};
pub use error::{LiveError, LiveResult};
pub use snapshot::{PvValue, Snapshot};
