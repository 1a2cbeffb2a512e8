//! `key=value;key=value` parameter strings exchanged with the framework

use tinyhal_core::domain::audio::DeviceMask;
use tracing::warn;

/// Key carrying a new output device mask
pub const ROUTING: &str = "routing";

/// Parsed parameter string, in the order given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrParms {
    pairs: Vec<(String, String)>,
}

impl StrParms {
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Self { pairs }
    }

    /// Last value given for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Device mask carried by the `routing` key.
    ///
    /// `None` when the key is absent, non-numeric or zero.
    pub fn routing(&self) -> Option<DeviceMask> {
        let raw = self.get(ROUTING)?;

        match raw.parse::<u32>() {
            Ok(0) => {
                warn!("Ignoring zero routing");
                None
            }
            Ok(bits) => Some(DeviceMask::from_bits(bits)),
            Err(_) => {
                warn!("Ignoring non-numeric routing '{}'", raw);
                None
            }
        }
    }
}
