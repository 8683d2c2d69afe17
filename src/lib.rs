pub mod admission;
pub mod batcher;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod sink;
pub mod stats;

#[cfg(test)]
pub mod test_support;
