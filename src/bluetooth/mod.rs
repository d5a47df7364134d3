//! Bluetooth collaborators for the beacon pipeline.
//!
//! The scanner delivers advertisements from BlueZ discovery, the
//! connectivity probe tracks whether the headset is connected.

pub mod connectivity;
pub mod scanner;
