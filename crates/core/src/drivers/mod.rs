//! Drivers for the I²C chips on the node, on top of `embedded-hal`.

pub mod mcp9808;
pub mod pcf85063a;

pub use mcp9808::{Mcp9808, Mcp9808Error};
pub use pcf85063a::{Pcf85063a, Pcf85063aError};
