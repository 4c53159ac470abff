//! # framepipe-recorder
//!
//! Command-line recorder built on `framepipe-core`. A synthetic renderer
//! draws a test pattern every tick, a simulated asynchronous readback
//! returns the images out of order, and the recorder streams the paced,
//! re-ordered frames into an ffmpeg subprocess.

pub mod config;
pub mod service;
pub mod synthetic;
