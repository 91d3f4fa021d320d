//! Database row types and per-table operations.

pub mod crawl_jobs;
pub mod generated_files;
pub mod models;
pub mod pages;
pub mod schedules;
pub mod sites;
pub mod tasks;
