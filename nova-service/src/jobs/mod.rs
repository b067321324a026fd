//! Background Jobs for the Nova service
//!
//! - `cache_cleanup`: Evicts stale artifact cache entries and expired claims
//!
//! # Usage
//!
//! The scheduler is an owned resource started at process init and stopped
//! on graceful shutdown:
//!
//! ```ignore
//! use nova_service::jobs::{CleanupConfig, CleanupScheduler};
//!
//! let scheduler = CleanupScheduler::new(Arc::clone(&store), CleanupConfig::from_env());
//! scheduler.start();
//!
//! // On shutdown
//! scheduler.stop().await;
//! ```

pub mod cache_cleanup;

pub use cache_cleanup::{
    CleanupConfig, CleanupMetrics, CleanupScheduler, CleanupSnapshot, CleanupStatus, SweepReport,
};
