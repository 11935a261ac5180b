#![crate_name = "pronghorn_ofp"]
#![crate_type = "lib"]

pub mod addr;
pub mod barrier;
mod bits;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod flow_entry;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x04;
pub mod oxm;
pub mod switch_listener;

pub use error::{Error, Result};
pub use ofp_controller::{Controller, OfpController};
