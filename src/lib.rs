pub mod cli;
pub mod compress;
pub mod config;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod types;
pub mod util;
