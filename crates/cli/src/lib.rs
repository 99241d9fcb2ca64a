//! testforge CLI
//!
//! Command-line driver for the testforge compiler: collects the request from
//! flags, runs the pipeline and writes its output to disk.

pub mod commands;
pub mod output;
pub mod persist;
