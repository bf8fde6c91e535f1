//! Fixed-size byte identifiers: contract addresses and module hashes.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

macro_rules! bytes32 {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct $name(pub [u8; 32]);

    impl $name {
      pub const LEN: usize = 32;

      pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
      }

      pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
      }

      /// First eight hex digits, used in file names and reports.
      pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", stringify!($name), self.short())
      }
    }

    impl FromStr for $name {
      type Err = hex::FromHexError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
      }
    }

    impl Serialize for $name {
      fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
      }
    }

    impl<'de> Deserialize<'de> for $name {
      fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
      }
    }
  };
}

bytes32! {
  /// Address of a deployed contract instance.
  Address
}

bytes32! {
  /// SHA-256 of a module's bytes.
  ModuleHash
}

impl Address {
  /// The address the test contract is deployed at.
  pub const TEST: Address = Address([0xff; 32]);
}

impl ModuleHash {
  pub fn of(bytes: &[u8]) -> Self {
    use sha2::{Digest, Sha256};
    Self(Sha256::digest(bytes).into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hex_round_trip() {
    let h = ModuleHash::of(b"abc");
    assert_eq!(h.short(), "ba7816bf");
    let s = serde_json::to_string(&h).unwrap();
    assert_eq!(serde_json::from_str::<ModuleHash>(&s).unwrap(), h);
    assert!("0x1234".parse::<Address>().is_err());
  }
}
