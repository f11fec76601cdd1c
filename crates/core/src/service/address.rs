/// .onion hidden-service addresses
///
/// A v3 address is 56 base32 characters encoding the service's ed25519
/// public key, a two byte checksum and the version byte `3`. A legacy v2
/// address is 16 base32 characters encoding a truncated key hash.

use serde::{Deserialize, Serialize};
use std::fmt;

const ONION_SUFFIX: &str = ".onion";
const V2_LEN: usize = 16;
const V3_LEN: usize = 56;
const V3_DECODED_LEN: usize = 35;
const V3_VERSION_BYTE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnionVersion {
    V2,
    V3,
}

/// A validated hidden-service address, stored lowercase without suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnionAddress {
    service_id: String,
    version: OnionVersion,
}

impl OnionAddress {
    /// Parse from hostname (with or without .onion suffix)
    pub fn from_hostname(hostname: &str) -> Result<Self, OnionAddressError> {
        let hostname = hostname.trim().to_lowercase();
        let service_id = hostname.strip_suffix(ONION_SUFFIX).unwrap_or(&hostname);

        let bytes = data_encoding::BASE32_NOPAD
            .decode(service_id.to_uppercase().as_bytes())
            .map_err(|_| OnionAddressError::InvalidEncoding)?;

        let version = match service_id.len() {
            V2_LEN => OnionVersion::V2,
            V3_LEN => {
                if bytes.len() != V3_DECODED_LEN {
                    return Err(OnionAddressError::InvalidLength(service_id.len()));
                }
                let version = bytes[V3_DECODED_LEN - 1];
                if version != V3_VERSION_BYTE {
                    return Err(OnionAddressError::UnsupportedVersion(version));
                }
                OnionVersion::V3
            }
            other => return Err(OnionAddressError::InvalidLength(other)),
        };

        Ok(Self {
            service_id: service_id.to_string(),
            version,
        })
    }

    /// Build a v3 address from its public key and checksum
    pub fn v3_from_parts(public_key: &[u8; 32], checksum: [u8; 2]) -> Self {
        let mut bytes = Vec::with_capacity(V3_DECODED_LEN);
        bytes.extend_from_slice(public_key);
        bytes.extend_from_slice(&checksum);
        bytes.push(V3_VERSION_BYTE);

        Self {
            service_id: data_encoding::BASE32_NOPAD.encode(&bytes).to_lowercase(),
            version: OnionVersion::V3,
        }
    }

    /// Address without the .onion suffix, as the control port reports it
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn version(&self) -> OnionVersion {
        self.version
    }

    pub fn to_hostname(&self) -> String {
        format!("{}{}", self.service_id, ONION_SUFFIX)
    }

    /// Check if a hostname carries the .onion suffix
    pub fn is_onion_address(hostname: &str) -> bool {
        hostname.trim().to_lowercase().ends_with(ONION_SUFFIX)
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hostname())
    }
}

impl std::str::FromStr for OnionAddress {
    type Err = OnionAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hostname(s)
    }
}

/// Onion address errors
#[derive(Debug, thiserror::Error)]
pub enum OnionAddressError {
    #[error("Invalid base32 encoding")]
    InvalidEncoding,

    #[error("Invalid address length: {0} (expected 16 or 56)")]
    InvalidLength(usize),

    #[error("Unsupported onion version byte {0}")]
    UnsupportedVersion(u8),
}
