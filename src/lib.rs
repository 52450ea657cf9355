pub mod config;
pub mod coze;
pub mod database;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod routes;
pub mod schema;
pub mod server;
pub mod service;
pub mod webhook;

pub use error::{AppError, AppResult};
