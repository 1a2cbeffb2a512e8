//! Software mixer
//!
//! Stands in for a hardware card when running off-device. Controls are
//! created from the route table, and every write is appended to a shared
//! [`MixerLog`] so callers can inspect what a route change did.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tinyhal_core::domain::audio::{AudioError, Result};
use tinyhal_core::domain::mixer::{ControlValue, Mixer, MixerControl};
use tinyhal_core::domain::routing::RouteTable;
use tracing::debug;

/// One recorded control write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlWrite {
    Value { control: String, index: usize, value: i32 },
    Enum { control: String, label: String },
}

impl ControlWrite {
    pub fn control(&self) -> &str {
        match self {
            ControlWrite::Value { control, .. } | ControlWrite::Enum { control, .. } => control,
        }
    }
}

impl fmt::Display for ControlWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlWrite::Value { control, index, value } => {
                write!(f, "{}[{}] = {}", control, index, value)
            }
            ControlWrite::Enum { control, label } => write!(f, "{} = '{}'", control, label),
        }
    }
}

/// Shared, ordered record of control writes
#[derive(Debug, Clone, Default)]
pub struct MixerLog {
    writes: Arc<Mutex<Vec<ControlWrite>>>,
}

impl MixerLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, write: ControlWrite) {
        self.writes.lock().push(write);
    }

    pub fn snapshot(&self) -> Vec<ControlWrite> {
        self.writes.lock().clone()
    }

    /// Names of written controls in order, one entry per write
    pub fn controls(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .map(|w| w.control().to_string())
            .collect()
    }

    pub fn take(&self) -> Vec<ControlWrite> {
        std::mem::take(&mut *self.writes.lock())
    }

    pub fn len(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.lock().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlState {
    Int(Vec<i32>),
    Enum { labels: Vec<String>, selected: Option<usize> },
}

#[derive(Debug)]
struct SimControl {
    name: String,
    state: ControlState,
    log: MixerLog,
}

impl MixerControl for SimControl {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_values(&self) -> usize {
        match &self.state {
            ControlState::Int(values) => values.len(),
            ControlState::Enum { .. } => 1,
        }
    }

    fn set_value(&mut self, index: usize, value: i32) -> Result<()> {
        let slot = match &mut self.state {
            ControlState::Int(values) => values.get_mut(index),
            ControlState::Enum { labels, selected } => {
                let item = usize::try_from(value)
                    .ok()
                    .filter(|&item| index == 0 && item < labels.len());
                if let Some(item) = item {
                    *selected = Some(item);
                    self.log.push(ControlWrite::Value {
                        control: self.name.clone(),
                        index,
                        value,
                    });
                    return Ok(());
                }
                None
            }
        };

        let Some(slot) = slot else {
            return Err(AudioError::Control {
                control: self.name.clone(),
                reason: format!("no value {} / {}", index, value),
            });
        };

        *slot = value;
        self.log.push(ControlWrite::Value {
            control: self.name.clone(),
            index,
            value,
        });
        Ok(())
    }

    fn set_enum_by_string(&mut self, label: &str) -> Result<()> {
        let ControlState::Enum { labels, selected } = &mut self.state else {
            return Err(AudioError::Control {
                control: self.name.clone(),
                reason: "not an enumerated control".to_string(),
            });
        };

        let Some(item) = labels.iter().position(|l| l == label) else {
            return Err(AudioError::Control {
                control: self.name.clone(),
                reason: format!("no item '{}'", label),
            });
        };

        *selected = Some(item);
        self.log.push(ControlWrite::Enum {
            control: self.name.clone(),
            label: label.to_string(),
        });
        Ok(())
    }
}

/// Mixer card simulated in memory
#[derive(Debug, Default)]
pub struct SimMixer {
    controls: BTreeMap<String, SimControl>,
    log: MixerLog,
}

impl SimMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every control the route table refers to.
    ///
    /// Integer controls get `channels` sub-channels. Enumerated controls
    /// accept every label the table uses for them.
    pub fn from_table(table: &RouteTable, channels: usize) -> Self {
        let mut mixer = Self::new();
        let log = mixer.log.clone();

        let sequences = table
            .entries()
            .iter()
            .flat_map(|entry| [entry.on.as_slice(), entry.off.as_slice()])
            .chain(std::iter::once(table.defaults()));

        for setting in sequences.flatten() {
            match &setting.value {
                ControlValue::Int(_) => {
                    mixer
                        .controls
                        .entry(setting.name.clone())
                        .or_insert_with(|| SimControl {
                            name: setting.name.clone(),
                            state: ControlState::Int(vec![0; channels]),
                            log: log.clone(),
                        });
                }
                ControlValue::Enum(label) => {
                    let control = mixer
                        .controls
                        .entry(setting.name.clone())
                        .or_insert_with(|| SimControl {
                            name: setting.name.clone(),
                            state: ControlState::Enum {
                                labels: Vec::new(),
                                selected: None,
                            },
                            log: log.clone(),
                        });
                    if let ControlState::Enum { labels, .. } = &mut control.state {
                        if !labels.contains(label) {
                            labels.push(label.clone());
                        }
                    }
                }
            }
        }

        debug!("Simulated mixer with {} controls", mixer.controls.len());
        mixer
    }

    pub fn with_int(mut self, name: &str, channels: usize) -> Self {
        self.controls.insert(
            name.to_string(),
            SimControl {
                name: name.to_string(),
                state: ControlState::Int(vec![0; channels]),
                log: self.log.clone(),
            },
        );
        self
    }

    pub fn with_enum(mut self, name: &str, labels: &[&str]) -> Self {
        self.controls.insert(
            name.to_string(),
            SimControl {
                name: name.to_string(),
                state: ControlState::Enum {
                    labels: labels.iter().map(|l| l.to_string()).collect(),
                    selected: None,
                },
                log: self.log.clone(),
            },
        );
        self
    }

    /// Handle onto the write log, valid after the mixer is boxed away
    pub fn log(&self) -> MixerLog {
        self.log.clone()
    }

    /// Current value of a control as text
    pub fn value(&self, name: &str) -> Option<String> {
        self.controls.get(name).map(|ctl| match &ctl.state {
            ControlState::Int(values) => values
                .iter()
                .map(i32::to_string)
                .collect::<Vec<_>>()
                .join(","),
            ControlState::Enum { labels, selected } => selected
                .and_then(|item| labels.get(item).cloned())
                .unwrap_or_default(),
        })
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

impl Mixer for SimMixer {
    fn control(&mut self, name: &str) -> Option<&mut dyn MixerControl> {
        self.controls
            .get_mut(name)
            .map(|ctl| ctl as &mut dyn MixerControl)
    }
}
