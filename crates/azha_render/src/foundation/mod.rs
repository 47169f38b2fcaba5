//! Foundation module - small utilities shared by the renderer
//!
//! - Logging setup
//! - Explicit id allocation for objects whose lifetime the caller manages

pub mod ids;
pub mod logging;
