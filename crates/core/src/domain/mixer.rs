//! Mixer control abstraction and sequence application
//!
//! A route is an ordered list of [`ControlSetting`]s. The [`ControlSequencer`]
//! writes them to a [`Mixer`] one by one, skipping controls the card does not
//! expose so that a single bad entry never aborts the rest of the path.

use crate::domain::audio::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

/// Value written to a mixer control
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    /// Broadcast to every sub-channel of the control
    Int(i32),
    /// Enumerated item selected by label
    Enum(String),
}

impl ControlValue {
    /// Interpret a textual value from a route description.
    ///
    /// Anything that parses as a signed integer is numeric, everything else
    /// is an enumerated label.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i32>() {
            Ok(value) => ControlValue::Int(value),
            Err(_) => ControlValue::Enum(raw.to_string()),
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Int(value) => write!(f, "{}", value),
            ControlValue::Enum(label) => write!(f, "{}", label),
        }
    }
}

/// One named-control write within a route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlSetting {
    pub name: String,
    pub value: ControlValue,
}

impl ControlSetting {
    pub fn new(name: impl Into<String>, value: ControlValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, ControlValue::Int(value))
    }

    pub fn label(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, ControlValue::Enum(label.into()))
    }
}

/// A single control exposed by a mixer card
pub trait MixerControl {
    /// Control name as reported by the card
    fn name(&self) -> &str;

    /// Number of addressable sub-channels (2 for a stereo volume)
    fn num_values(&self) -> usize;

    /// Write one sub-channel
    fn set_value(&mut self, index: usize, value: i32) -> Result<()>;

    /// Select an enumerated item by its label
    fn set_enum_by_string(&mut self, label: &str) -> Result<()>;
}

/// Card-level mixer handle
///
/// Implementations live outside the routing engine (hardware bindings, the
/// software mixer used off-device, recording doubles in tests).
pub trait Mixer: Send {
    /// Resolve a control by name
    fn control(&mut self, name: &str) -> Option<&mut dyn MixerControl>;
}

/// Applies ordered control sequences to a mixer
pub struct ControlSequencer {
    mixer: Box<dyn Mixer>,
}

impl ControlSequencer {
    pub fn new(mixer: Box<dyn Mixer>) -> Self {
        Self { mixer }
    }

    /// Apply every setting in order.
    ///
    /// Best effort: unknown controls and failed writes are logged and the
    /// remaining entries are still applied. Partial failure is not reported,
    /// so this currently always returns `Ok`.
    pub fn apply(&mut self, sequence: &[ControlSetting]) -> Result<()> {
        for setting in sequence {
            let Some(ctl) = self.mixer.control(&setting.name) else {
                error!("Unknown control '{}'", setting.name);
                continue;
            };

            match &setting.value {
                ControlValue::Enum(label) => match ctl.set_enum_by_string(label) {
                    Ok(()) => debug!("Set '{}' to '{}'", ctl.name(), label),
                    Err(e) => error!("Failed to set '{}' to '{}': {}", ctl.name(), label, e),
                },
                ControlValue::Int(value) => {
                    // Stereo controls get both channels in one pass
                    for index in 0..ctl.num_values() {
                        match ctl.set_value(index, *value) {
                            Ok(()) => debug!("Set '{}'.{} to {}", ctl.name(), index, value),
                            Err(e) => error!(
                                "Failed to set '{}'.{} to {}: {}",
                                ctl.name(),
                                index,
                                value,
                                e
                            ),
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ControlSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSequencer").finish_non_exhaustive()
    }
}
