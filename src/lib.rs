//! Firmware control core for the rotary-encoder knob.
//!
//! Everything here is hardware-independent: the ESP32-S3 binary in
//! `main.rs` plugs concrete drivers into the traits defined by these
//! modules, and the host test suite plugs in mocks.
//!
//! Usage: `cargo test` (host) or
//! `cargo run --release --features embedded --target xtensa-esp32s3-none-elf`
//!
//! ## Contexts
//!
//! - **Coordination** (20 Hz): [`coordinator::Coordinator`] + [`net::NetworkManager`]
//! - **Render** (30 Hz): [`ui::UiContext`] - encoder classification and screens
//! - **LED** (50 Hz): [`led::animator`] - ranked animations on the ring
//! - helpers: buzzer, WiFi driver, portal HTTP server, console

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "embedded")]
extern crate alloc;

#[macro_use]
mod fmt;

pub mod bus;
pub mod buzzer;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod health;
pub mod led;
pub mod net;
pub mod storage;
pub mod ui;

pub use bus::{Direction, EventBus};
pub use coordinator::{Coordinator, CoordinatorConfig, SystemRequest, SystemState};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
