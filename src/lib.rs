pub mod annotate;
pub mod api;
pub mod client;
pub mod config;
pub mod detector;
pub mod fetch;
pub mod humanize;
pub mod observability;
pub mod producer;
pub mod queue;
pub mod storage;
pub mod task;
pub mod worker;
