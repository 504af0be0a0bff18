//! Conversational patient intake over a remote triage backend.

pub mod config;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod socket;
