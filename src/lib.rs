#[macro_use]
extern crate quick_error;

mod classifier;
mod config;
mod engine;
mod error;
mod feedback;
mod frame_analysis;
mod geometry;
mod graphcut;
mod lbsp;
mod morphology;
pub mod progress;
mod rng;
mod sampler;
mod samples;
mod warp;

pub use crate::config::{Config, ConfigBuilder};
pub use crate::engine::Engine;
pub use crate::error::{Error, Result};
pub use crate::warp::{Mat3, IDENTITY};

pub use rgb::RGB8;
