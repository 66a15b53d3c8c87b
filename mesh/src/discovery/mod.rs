//! Filesystem discovery of agent candidates.
//!
//! Strategies answer "is this directory an agent project?"; the scanner
//! walks scan roots, auto-imports directories that already carry a
//! manifest, and streams everything else a strategy recognises as a
//! candidate for user approval.

mod scanner;
mod strategy;

pub use scanner::{scan_directory, DiscoveryEvent, ScanOptions};
pub use strategy::{
    default_strategies, ClaudeCodeStrategy, CodexStrategy, CursorStrategy, DiscoveryHints,
    DiscoveryStrategy,
};
