//! Drafter - interactive document generation sessions
//!
//! Drives AI-backed document generation over a WebSocket: priority-ordered
//! backends with automatic fallback, repository context retrieval, and
//! mid-generation clarification rounds with the connected client.

pub mod actors;
pub mod api;
pub mod app_state;
pub mod backends;
pub mod collaborators;
pub mod config;
pub mod correlation;
pub mod generation;
pub mod retrieval;
