/// Hidden-service addressing
///
/// This module validates the hostnames the transport daemon assigns to
/// hidden services (v2 and v3 `.onion` addresses).

pub mod address;

pub use address::{OnionAddress, OnionAddressError, OnionVersion};
