pub mod config;
pub mod fetcher;
pub mod filter;
pub mod humanize;
pub mod notify;
pub mod observability;
pub mod pagination;
pub mod related;
pub mod runner;
pub mod sink;
pub mod task;
pub mod worker;
