//! Multi-tenant appointment booking engine.
//!
//! Businesses publish a weekly schedule, a catalogue of services and an
//! optional staff list. The engine answers "which start times are free for
//! this service on this date" and books appointments without ever letting
//! two active appointments overlap in the same scope. All state lives in
//! memory and is rebuilt from a write-ahead log on startup.

pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

pub use config::{DefaultWeek, EngineConfig};
pub use engine::{BookingRequest, Engine, EngineError};
