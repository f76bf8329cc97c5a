//! Overlay catalogs, installation and build-configuration upkeep.

pub mod backend;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod document;
pub mod error;
pub mod fetch;
pub mod hook;
pub mod installed;
pub mod interrupt;
pub mod makeconf;
pub mod manager;
pub mod report;
pub mod signature;
pub mod transport;
pub mod types;
pub mod validate;
pub mod xml;
