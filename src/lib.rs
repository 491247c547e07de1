//! Image Classification Fleet
//!
//! This library provides the core functionality for classifier-fleet: the
//! worker loop that drains the classification request queue, and the
//! scale-out / scale-in controllers that size the worker fleet to the
//! queue's depth.

pub mod app_state;
pub mod config;
pub mod control;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
