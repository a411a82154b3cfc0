//! # Arduino Telemetry
//!
//! Reads sensor packets from an Arduino over USB serial, stores every reading
//! in PostgreSQL (one schema per module, one table per sensor) and keeps a
//! live in-memory registry that a fixed-interval refresh loop renders.
//!
//! The `dbtools` binary covers the administrative side: queries, CSV export,
//! daemon control, backup and restore.

pub mod admin;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod models;
pub mod parameters;
pub mod refresh;
pub mod serial;
pub mod state;
pub mod utils;
pub mod view;
