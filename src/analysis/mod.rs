//! Behavioral analysis
//!
//! Per-source sliding-window state plus the fixed-order threshold rules
//! that turn it into threat alerts.

pub mod analyzer;
pub mod source_state;

pub use analyzer::BehavioralAnalyzer;
pub use source_state::{SourceSnapshot, SourceTable};
