//! Register-window and pin-driver layers.

pub mod pins;
pub mod registers;

pub use pins::PinDriver;
pub use registers::{FakeRegisters, RegisterWindow, Registers};
