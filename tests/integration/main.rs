//! Integration test crate; one module per pipeline stage

mod crawl_tests;
mod download_tests;
