// src/lib.rs

//! Incremental crawl-diff-sync for facility listings.

pub mod canonical;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
