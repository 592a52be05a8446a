pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod permissions;
pub mod rest;
pub mod roles;

#[cfg(test)]
pub(crate) mod test_support;
