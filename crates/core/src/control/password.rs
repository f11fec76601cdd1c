use rand::RngCore;
use sha1::{Digest, Sha1};

const SALT_LEN: usize = 8;

/// Iteration indicator, 65536 bytes hashed
const DEFAULT_INDICATOR: u8 = 96;

/// Salted, iterated SHA-1 digest of a control password
///
/// Produces the `16:<hex>` form the daemon accepts for
/// `HashedControlPassword`: the 9-byte specifier (salt plus iteration
/// indicator) followed by the digest, hex encoded.
#[derive(Debug, Clone)]
pub struct PasswordDigest {
    secret: Vec<u8>,
    specifier: [u8; SALT_LEN + 1],
}

impl PasswordDigest {
    /// Digest `secret` with a random salt
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        let mut specifier = [0u8; SALT_LEN + 1];
        rand::thread_rng().fill_bytes(&mut specifier[..SALT_LEN]);
        specifier[SALT_LEN] = DEFAULT_INDICATOR;
        Self::with_specifier(secret, specifier)
    }

    pub fn with_specifier(secret: impl Into<Vec<u8>>, specifier: [u8; SALT_LEN + 1]) -> Self {
        Self {
            secret: secret.into(),
            specifier,
        }
    }

    /// Number of bytes fed to the hash for an indicator byte
    fn count(indicator: u8) -> usize {
        let c = indicator as usize;
        (16 + (c & 15)) << ((c >> 4) + 6)
    }

    fn secret_to_key(&self) -> [u8; 20] {
        let mut remaining = Self::count(self.specifier[SALT_LEN]);
        let mut block = Vec::with_capacity(SALT_LEN + self.secret.len());
        block.extend_from_slice(&self.specifier[..SALT_LEN]);
        block.extend_from_slice(&self.secret);

        let mut hasher = Sha1::new();
        while remaining > 0 && remaining >= block.len() {
            hasher.update(&block);
            remaining -= block.len();
        }
        hasher.update(&block[..remaining.min(block.len())]);

        let mut key = [0u8; 20];
        key.copy_from_slice(&hasher.finalize());
        key
    }

    pub fn hashed_password(&self) -> String {
        let mut bytes = self.specifier.to_vec();
        bytes.extend_from_slice(&self.secret_to_key());
        format!("16:{}", hex::encode_upper(bytes))
    }
}
