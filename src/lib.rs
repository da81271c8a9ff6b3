//! Nodexia - trip lifecycle state machine and dispatch synchronization

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod events;
pub mod notifications;
pub mod state_machine;
pub mod sync;
pub mod triage;
