#![no_std]

// Duty-cycle logic for the battery-powered field node.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware is reached only through the traits each
// module exposes, so the emulator and the firmware drive the same code.

pub mod bus;
pub mod checksum;
pub mod config;
pub mod cycle;
pub mod power;
pub mod sensors;
pub mod session;
pub mod sleep;
pub mod telemetry;

pub use cycle::{Board, BoardParts, CycleOutcome, CyclePhase, CycleReport, DutyCycle};
