//! Test doubles for the hardware socket layer. They are used for testing the channels
//!  themselves, but they are also exported for testing application code built on the channels
//!  without a socket chip.

pub mod loopback;
