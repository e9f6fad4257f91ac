//! Bit-banged HUB75 32x32 RGB LED matrix driver for the Raspberry Pi GPIO
//! register block: a row-multiplexed, binary-code-modulated refresh loop
//! driven by a dedicated thread, exposed behind a small façade.

pub mod display;
pub mod error;
pub mod frame;
pub mod gpio;
pub(crate) mod painter;
pub mod timer;

pub use display::Display;
pub use error::SetupError;
pub use frame::{Frame, Rgba, HEIGHT, WIDTH};
pub use gpio::{RegisterWindow, Registers};
pub use timer::{IntervalTimer, Timerfd};
