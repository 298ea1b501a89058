//! Common utilities for the USB/IP virtual host controller
//!
//! This crate provides functionality shared across the workspace: USB
//! descriptor parsing, error handling, logging setup and test helpers.

pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb::{ConfigurationView, DeviceDescriptor, DeviceSpeed, InterfaceDescriptor};
