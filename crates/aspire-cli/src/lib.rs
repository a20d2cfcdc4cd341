//! CLI library components for the aspire build driver.

pub mod cli;
pub mod commands;
pub mod logging;
