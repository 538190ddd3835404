//! garage-background library crate.
//!
//! Captures a still of the empty garage under controlled lighting, corrects
//! the sensor orientation and channel order, and atomically publishes the
//! result as the reference image consumed by the detection service.

pub mod camera;
pub mod cli;
pub mod config;
pub mod controller;
pub mod illumination;
pub mod lock;
pub mod process;
pub mod publish;
pub mod transform;
