//! Route table and device selection engine
//!
//! The [`RouteTable`] maps each physical device to the control sequences that
//! switch its path on and off. The [`Router`] owns the table together with the
//! requested/active device masks and the mixer, and converges the hardware
//! onto the requested masks with a make-before-break protocol.

use crate::domain::audio::{DeviceMask, Direction};
use crate::domain::mixer::{ControlSequencer, ControlSetting, Mixer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which of a device's two sequences to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathRole {
    On,
    Off,
}

/// Control sequences for one physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRouteEntry {
    pub name: String,
    pub mask: DeviceMask,
    pub on: Vec<ControlSetting>,
    pub off: Vec<ControlSetting>,
}

impl DeviceRouteEntry {
    pub fn new(name: impl Into<String>, mask: DeviceMask) -> Self {
        Self {
            name: name.into(),
            mask,
            on: Vec::new(),
            off: Vec::new(),
        }
    }

    pub fn sequence(&self, role: PathRole) -> &[ControlSetting] {
        match role {
            PathRole::On => &self.on,
            PathRole::Off => &self.off,
        }
    }

    pub fn direction(&self) -> Direction {
        self.mask.direction()
    }
}

/// Immutable device → route mapping, built once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    entries: Vec<DeviceRouteEntry>,
    defaults: Vec<ControlSetting>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    pub fn entries(&self) -> &[DeviceRouteEntry] {
        &self.entries
    }

    /// Entries belonging to one half of the device space, in table order
    pub fn entries_for(&self, direction: Direction) -> impl Iterator<Item = &DeviceRouteEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.direction() == direction)
    }

    pub fn entry(&self, name: &str) -> Option<&DeviceRouteEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Sequence applied once, unconditionally, when the device starts
    pub fn defaults(&self) -> &[ControlSetting] {
        &self.defaults
    }

    /// Union of every configured device mask
    pub fn supported_devices(&self) -> DeviceMask {
        self.entries
            .iter()
            .fold(DeviceMask::NONE, |acc, entry| acc | entry.mask)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable staging area for a [`RouteTable`]
///
/// Populated by the configuration loader, then frozen with [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    entries: Vec<DeviceRouteEntry>,
    defaults: Vec<ControlSetting>,
}

impl RouteTableBuilder {
    /// Declare a device, returning its slot.
    ///
    /// A device whose bits are already claimed by another entry reuses that
    /// entry so that every bit maps to at most one route.
    pub fn device(&mut self, name: &str, mask: DeviceMask) -> usize {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.direction() == mask.direction() && entry.mask.intersects(mask))
        {
            warn!(
                "Device {} [{}] overlaps '{}', reusing its entry",
                name, mask, self.entries[index].name
            );
            return index;
        }

        info!("Allocating device {} [{}]", name, mask);
        self.entries.push(DeviceRouteEntry::new(name, mask));
        self.entries.len() - 1
    }

    /// Install the on or off sequence of a declared device
    pub fn set_path(&mut self, device: usize, role: PathRole, sequence: Vec<ControlSetting>) {
        let Some(entry) = self.entries.get_mut(device) else {
            warn!("Path for unknown device slot {}", device);
            return;
        };

        let slot = match role {
            PathRole::On => &mut entry.on,
            PathRole::Off => &mut entry.off,
        };
        if !slot.is_empty() {
            warn!("Replacing {:?} sequence of '{}'", role, entry.name);
        }
        debug!("{} element {:?} sequence for '{}'", sequence.len(), role, entry.name);
        *slot = sequence;
    }

    /// Append to the unconditional startup sequence
    pub fn push_defaults(&mut self, sequence: Vec<ControlSetting>) {
        debug!("{} element default route", sequence.len());
        self.defaults.extend(sequence);
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            entries: self.entries,
            defaults: self.defaults,
        }
    }
}

/// Routing intent versus what the hardware currently has enabled
///
/// Output and input halves are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRouteState {
    pub requested_out: DeviceMask,
    pub active_out: DeviceMask,
    pub requested_in: DeviceMask,
    pub active_in: DeviceMask,
}

impl ActiveRouteState {
    pub fn requested(&self, direction: Direction) -> DeviceMask {
        match direction {
            Direction::Output => self.requested_out,
            Direction::Input => self.requested_in,
        }
    }

    pub fn active(&self, direction: Direction) -> DeviceMask {
        match direction {
            Direction::Output => self.active_out,
            Direction::Input => self.active_in,
        }
    }

    fn requested_mut(&mut self, direction: Direction) -> &mut DeviceMask {
        match direction {
            Direction::Output => &mut self.requested_out,
            Direction::Input => &mut self.requested_in,
        }
    }

    fn active_mut(&mut self, direction: Direction) -> &mut DeviceMask {
        match direction {
            Direction::Output => &mut self.active_out,
            Direction::Input => &mut self.active_in,
        }
    }
}

/// Device selection engine
///
/// Owns everything the routing lock protects: the route table, the
/// requested/active masks and the mixer. Holding `&mut Router` is holding the
/// routing lock.
/// Selection never fails, so a sequencer error is only logged
fn run_sequence(sequencer: &mut ControlSequencer, name: &str, sequence: &[ControlSetting]) {
    if let Err(e) = sequencer.apply(sequence) {
        warn!("Route '{}' only partly applied: {}", name, e);
    }
}

#[derive(Debug)]
pub struct Router {
    table: RouteTable,
    state: ActiveRouteState,
    sequencer: ControlSequencer,
}

impl Router {
    /// Create a router and apply the table's startup sequence
    pub fn new(table: RouteTable, mixer: Box<dyn Mixer>) -> Self {
        let mut sequencer = ControlSequencer::new(mixer);

        if !table.defaults().is_empty() {
            debug!("Applying {} element default route", table.defaults().len());
            run_sequence(&mut sequencer, "defaults", table.defaults());
        }

        Self {
            table,
            state: ActiveRouteState::default(),
            sequencer,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn state(&self) -> ActiveRouteState {
        self.state
    }

    pub fn supported_devices(&self) -> DeviceMask {
        self.table.supported_devices()
    }

    /// Replace the requested devices of one direction and converge on them.
    ///
    /// Previously requested bits of that direction are dropped entirely, so
    /// devices are mutually exclusive per open stream.
    pub fn request(&mut self, direction: Direction, devices: DeviceMask) {
        let requested = self.state.requested_mut(direction);
        *requested = devices & direction.all();
        self.select(direction);
    }

    pub fn select_outputs(&mut self) {
        self.select(Direction::Output);
    }

    pub fn select_inputs(&mut self) {
        self.select(Direction::Input);
    }

    /// Converge the active mask of one direction onto the requested mask.
    ///
    /// New paths are enabled before old ones are disabled so that switching
    /// outputs never leaves a gap. Control failures are logged by the
    /// sequencer; the active mask is updated regardless.
    pub fn select(&mut self, direction: Direction) {
        let requested = self.state.requested(direction);
        let active = self.state.active(direction);

        if requested == active {
            return;
        }

        debug!(
            "Changing {} devices {} => {}",
            direction, active, requested
        );

        for entry in self.table.entries_for(direction) {
            if requested.intersects(entry.mask) && !active.intersects(entry.mask) {
                debug!("Enabling {} [{}]", entry.name, entry.mask);
                run_sequence(&mut self.sequencer, &entry.name, &entry.on);
            }
        }

        for entry in self.table.entries_for(direction) {
            if !requested.intersects(entry.mask) && active.intersects(entry.mask) {
                debug!("Disabling {} [{}]", entry.name, entry.mask);
                run_sequence(&mut self.sequencer, &entry.name, &entry.off);
            }
        }

        *self.state.active_mut(direction) = requested;
    }

    /// Re-apply one sequence for every currently requested device.
    ///
    /// Used by the stream lifecycle: `On` when a stream leaves standby,
    /// `Off` when it enters it. The masks themselves are left untouched.
    pub fn apply_requested(&mut self, direction: Direction, role: PathRole) {
        let requested = self.state.requested(direction);

        for entry in self.table.entries_for(direction) {
            if requested.intersects(entry.mask) {
                debug!("Setting {} to {:?} route", entry.name, role);
                run_sequence(&mut self.sequencer, &entry.name, entry.sequence(role));
            }
        }
    }
}
