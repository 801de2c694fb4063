//! HTTP collaborator surface for the ensemble engine.
//!
//! This crate is deliberately thin: it parses configuration, assembles a
//! coordinator, and exposes chat plus thread CRUD over axum. All engine
//! behaviour lives in `ensemble-engine`.

pub mod assemble;
pub mod http;
pub mod service;
pub mod tools;
