pub mod api;
pub mod config;
pub mod dispatch;
pub mod humanize;
pub mod job;
pub mod notifier;
pub mod observability;
pub mod processor;
pub mod storage;
pub mod store;
