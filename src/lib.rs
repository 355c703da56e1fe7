//! Teamboard work-management server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod comments;
pub mod config;
pub mod db;
pub mod fanout;
pub mod notifications;
pub mod pagination;
pub mod projects;
pub mod realtime;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod users;
