#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate panic_halt;

#[cfg_attr(not(target_os = "none"), allow(dead_code))]
mod epoch;
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
mod nvm;
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
mod telemetry;

#[cfg(target_os = "none")]
mod board;
#[cfg(target_os = "none")]
mod runtime;

#[cfg(not(target_os = "none"))]
fn main() {}
