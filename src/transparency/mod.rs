//! Transparency module for the Gait Sensor Agent.
//!
//! Tracks how much gait data the agent aggregated and where it went,
//! supporting patient trust and clinical audit.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
