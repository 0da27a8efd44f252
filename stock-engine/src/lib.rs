//! Dual-store stock consistency engine.
//!
//! Keeps a relational system of record (SQLite) and a document read replica
//! (SurrealDB) synchronized for every stock-affecting event while
//! maintaining an append-only movement ledger and preventing negative stock
//! under concurrent access.
//!
//! Pattern: primary writes must succeed, the secondary mirror is
//! best-effort, and a reconciler heals detected drift (primary wins). This
//! is deliberately not a distributed transaction coordinator.

pub mod config;
pub mod db;
pub mod error;
pub mod replica;
pub mod stock;
pub mod tasks;
pub mod utils;

pub use config::{EnvThresholdSource, FixedThresholdSource, ThresholdCache, ThresholdSource};
pub use db::PrimaryStore;
pub use db::models::{
    CartReservation, DateInfo, MovementMetadata, MovementRecord, MovementType, NewMovement,
    Period, Product, ProductProjection,
};
pub use error::{StockError, StockResult};
pub use replica::SecondaryStore;
pub use stock::analytics::{
    Analytics, EvolutionPoint, GlobalEvolution, GlobalPoint, LowStockReport, TopMover,
    TypeSummary, Urgency,
};
pub use stock::reconcile::{ReconcileSummary, Reconciler, VerifyReport};
pub use stock::service::{
    LogNotifier, LowStockAlert, LowStockNotifier, MutationOutcome, StockService,
};
pub use stock::sweeper::{ReservationSweeper, SweepOutcome};
pub use stock::{EngineConfig, StockEngine};
pub use tasks::{BackgroundTasks, TaskKind};
