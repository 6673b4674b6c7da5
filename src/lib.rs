//! Multi-account ingestion of actionable work items.
//!
//! Polls every configured account (Gmail, Google Calendar, Linear) on a
//! schedule, converts what each returns into tasks, and keeps a status
//! surface for accounts that need the operator's attention.

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod integrations;
mod migrations;
pub mod poller;
pub mod scoring;
pub mod services;
pub mod state;
pub mod types;
pub mod util;
pub mod validation;
