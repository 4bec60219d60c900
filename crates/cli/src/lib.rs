//! Command line front end for the playback engine.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
pub mod repository;
