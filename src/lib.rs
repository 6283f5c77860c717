//! Version-upgrade engine for OpenTelemetryCollector resources
//!
//! Brings collector instances written for older operand versions up to the
//! version this operator ships, one versioned transform at a time.

pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
pub mod upgrade;
