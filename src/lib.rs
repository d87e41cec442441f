#![allow(clippy::result_large_err)]

pub mod app;
pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod management;
pub mod publisher;
pub mod telemetry;
pub mod transport;
