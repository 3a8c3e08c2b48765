pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod session;
pub mod storage;
pub mod ui;
pub mod web;

pub use config::{ConfigLoader, ConfigPaths, Settings};
