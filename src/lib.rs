#[macro_use]
extern crate log;

pub mod assistant;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod runtime;
pub mod service;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod tests;
