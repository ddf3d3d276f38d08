//! SCCP (Signaling Connection Control Part)
//!
//! Connectionless subset (UDT) used to carry MAP operations between
//! global-title addressed subsystems.

mod address;
mod messages;

pub use address::{AddressIndicator, GlobalTitle, SccpAddress};
pub use messages::SccpMessage;
