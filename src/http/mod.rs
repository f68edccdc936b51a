pub mod app_server;
pub mod auth_middleware;
pub mod controllers;
pub mod error;
pub mod models;
