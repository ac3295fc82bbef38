//! Curve25519 key material.
//!
//! Three kinds of 32-byte keys travel through a mesh config: the interface
//! private key, the public keys identifying peers, and the preshared key
//! pinned to each peering. All of them cross the wire as standard base64
//! inside wg-quick files, so every type here parses with [`FromStr`] and
//! prints with `to_base64`. Secret material never leaks through `Debug`.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand_core::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as Curve25519Point, StaticSecret};

use crate::error::ConfigError;

/// Raw length of every WireGuard key.
pub const KEY_LEN: usize = 32;

fn decode(label: &str, encoded: &str) -> Result<[u8; KEY_LEN], ConfigError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| ConfigError::InvalidKey(format!("{label}: {e}")))?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        ConfigError::InvalidKey(format!("{label}: got {} bytes, want {KEY_LEN}", bytes.len()))
    })
}

/// An interface private key.
///
/// Generated once per node and thereafter read back from the on-disk
/// config, so a node's identity survives restarts of the tool.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Builds a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// The raw key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    /// The matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*Curve25519Point::from(&self.0).as_bytes())
    }

    /// Renders the key for a `PrivateKey =` config line.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

impl FromStr for PrivateKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_bytes(decode("private key", s)?))
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes().ct_eq(&other.to_bytes()).into()
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Identify the key by what it derives, never by what it is.
        write!(f, "PrivateKey(pub {})", self.public_key().to_base64())
    }
}

/// A peer's public identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Builds a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    /// Renders the key for a `PublicKey =` config line.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl FromStr for PublicKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode("public key", s)?))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_base64()).finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// The symmetric key a peered pair shares.
///
/// Minted by whichever side creates the peering and stamped into both
/// configs, so the pair always agrees on it.
#[derive(Clone)]
pub struct PresharedKey([u8; KEY_LEN]);

impl PresharedKey {
    /// Mints a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Builds a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    /// Renders the key for a `PresharedKey =` config line.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl FromStr for PresharedKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode("preshared key", s)?))
    }
}

impl PartialEq for PresharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PresharedKey {}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PresharedKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_what_it_prints() {
        let private = PrivateKey::generate();
        let public = private.public_key();
        let psk = PresharedKey::generate();

        let private_again: PrivateKey = private.to_base64().parse().expect("private parses");
        let public_again: PublicKey = public.to_base64().parse().expect("public parses");
        let psk_again: PresharedKey = psk.to_base64().parse().expect("psk parses");

        assert_eq!(private_again, private);
        assert_eq!(public_again, public);
        assert_eq!(psk_again, psk);
    }

    #[test]
    fn from_bytes_is_the_inverse_of_to_bytes() {
        let seed = [0x5au8; KEY_LEN];
        assert_eq!(PrivateKey::from_bytes(seed).to_bytes(), seed);
        assert_eq!(PublicKey::from_bytes(seed).to_bytes(), seed);
        assert_eq!(PresharedKey::from_bytes(seed).to_bytes(), seed);
    }

    #[test]
    fn public_key_tracks_private_key() {
        let private = PrivateKey::generate();
        assert_eq!(private.public_key(), private.public_key());

        let other = PrivateKey::generate();
        assert_ne!(private.public_key(), other.public_key());
    }

    #[test]
    fn rejects_malformed_encodings() {
        assert!("not base64!".parse::<PublicKey>().is_err());
        assert!(BASE64.encode([0u8; 16]).parse::<PrivateKey>().is_err());
        assert!(BASE64.encode([0u8; 33]).parse::<PresharedKey>().is_err());
        assert!("".parse::<PublicKey>().is_err());
    }

    #[test]
    fn secret_debug_output_hides_key_material() {
        let private = PrivateKey::generate();
        let psk = PresharedKey::generate();

        let private_dbg = format!("{private:?}");
        assert!(!private_dbg.contains(&private.to_base64()));
        // the derived public key is fine to show
        assert!(private_dbg.contains(&private.public_key().to_base64()));

        assert_eq!(format!("{psk:?}"), "PresharedKey(..)");
    }

    #[test]
    fn preshared_keys_are_unique_per_generation() {
        assert_ne!(PresharedKey::generate(), PresharedKey::generate());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_key_bytes_survive_base64(bytes in prop::array::uniform32(any::<u8>())) {
                let parsed: Result<PublicKey, _> = PublicKey::from_bytes(bytes).to_base64().parse();
                prop_assert_eq!(parsed.ok().map(|k| k.to_bytes()), Some(bytes));
            }

            #[test]
            fn derivation_is_a_function_of_the_seed(seed: [u8; KEY_LEN]) {
                let a = PrivateKey::from_bytes(seed).public_key();
                let b = PrivateKey::from_bytes(seed).public_key();
                prop_assert_eq!(a, b);
            }
        }
    }
}
