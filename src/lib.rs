//! Load generator for a Keycloak token endpoint and a scrape-time session
//! metrics exporter built on the same admin client.

pub mod accounts;
pub mod admin;
pub mod config;
pub mod error;
pub mod exporter;
pub mod login;
pub mod mail;
pub mod maintenance;
pub mod results;
pub mod runner;
pub mod schedule;

pub use error::{Error, Result};
