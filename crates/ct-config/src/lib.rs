//! Configuration and logging setup for camera-trap survey transforms.
//!
//! This crate layers defaults, TOML files and `CT_` environment variables
//! into a [`Config`] and converts it into a [`ct_core::TransformConfig`].

mod config;
pub mod logging;

pub use config::{Config, dirs_config_path};
