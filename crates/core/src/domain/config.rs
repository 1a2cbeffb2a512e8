//! Configuration loading for the audio HAL
//!
//! This module provides:
//! - The XML route description parser producing a [`RouteTable`]
//! - HAL settings ([`HalConfig`]) with TOML serialization
//! - Board property lookup used to locate the route description

use crate::domain::audio::DeviceMask;
use crate::domain::mixer::{ControlSetting, ControlValue};
use crate::domain::routing::{PathRole, RouteTable, RouteTableBuilder};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at line {line}: {message}")]
    Xml { line: usize, message: String },

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Device names accepted in route descriptions
pub const DEVICE_NAMES: [(&str, DeviceMask); 11] = [
    ("speaker", DeviceMask::OUT_SPEAKER),
    (
        "headphone",
        DeviceMask::from_bits(
            DeviceMask::OUT_WIRED_HEADSET.bits() | DeviceMask::OUT_WIRED_HEADPHONE.bits(),
        ),
    ),
    ("earpiece", DeviceMask::OUT_EARPIECE),
    ("analog-dock", DeviceMask::OUT_ANLG_DOCK_HEADSET),
    ("digital-dock", DeviceMask::OUT_DGTL_DOCK_HEADSET),
    ("comms", DeviceMask::IN_COMMUNICATION),
    ("ambient", DeviceMask::IN_AMBIENT),
    ("builtin-mic", DeviceMask::IN_BUILTIN_MIC),
    ("headset", DeviceMask::IN_WIRED_HEADSET),
    ("digital", DeviceMask::IN_AUX_DIGITAL),
    ("back-mic", DeviceMask::IN_BACK_MIC),
];

/// Look up the mask of a named device
pub fn device_mask(name: &str) -> Option<DeviceMask> {
    DEVICE_NAMES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, mask)| *mask)
}

/// Path currently being collected
struct OpenPath {
    /// `None` for a top-level default path
    role: Option<PathRole>,
    /// Controls are parsed but dropped (unknown role, skipped device)
    discard: bool,
    settings: Vec<ControlSetting>,
    nested: usize,
}

/// Transient state while walking the route description
#[derive(Default)]
struct ParseState {
    builder: RouteTableBuilder,
    in_device: bool,
    device: Option<usize>,
    path: Option<OpenPath>,
}

impl ParseState {
    fn start(&mut self, elem: &[u8], name: Option<String>, val: Option<String>) {
        match elem {
            b"device" => self.start_device(name),
            b"path" => self.start_path(name),
            b"ctl" => self.control(name, val),
            _ => {}
        }
    }

    fn end(&mut self, elem: &[u8]) {
        match elem {
            b"path" => self.end_path(),
            b"device" => {
                self.in_device = false;
                self.device = None;
            }
            _ => {}
        }
    }

    fn start_device(&mut self, name: Option<String>) {
        self.in_device = true;

        let Some(name) = name else {
            error!("Unnamed device");
            return;
        };

        match device_mask(&name) {
            Some(mask) => self.device = Some(self.builder.device(&name, mask)),
            None => warn!("Unknown device '{}', skipping", name),
        }
    }

    fn start_path(&mut self, name: Option<String>) {
        if let Some(path) = self.path.as_mut() {
            warn!("Nested paths");
            path.nested += 1;
            return;
        }

        let (role, discard) = if self.in_device {
            match name.as_deref() {
                Some("on") => (Some(PathRole::On), self.device.is_none()),
                Some("off") => (Some(PathRole::Off), self.device.is_none()),
                other => {
                    warn!("Unknown path name {:?}", other);
                    (None, true)
                }
            }
        } else {
            (None, false)
        };

        self.path = Some(OpenPath {
            role,
            discard,
            settings: Vec::new(),
            nested: 0,
        });
    }

    fn control(&mut self, name: Option<String>, val: Option<String>) {
        let Some(name) = name else {
            error!("Unnamed control");
            return;
        };
        let Some(val) = val else {
            error!("No value specified for {}", name);
            return;
        };
        let Some(path) = self.path.as_mut() else {
            warn!("Control {} outside of a path, ignoring", name);
            return;
        };

        debug!("Parsing control {} => {}", name, val);
        path.settings
            .push(ControlSetting::new(name, ControlValue::parse(&val)));
    }

    fn end_path(&mut self) {
        let Some(mut path) = self.path.take() else {
            return;
        };

        if path.nested > 0 {
            path.nested -= 1;
            self.path = Some(path);
            return;
        }

        if path.settings.is_empty() {
            warn!("Empty path");
        }

        if path.discard {
            return;
        }

        match (path.role, self.device) {
            (Some(role), Some(device)) => self.builder.set_path(device, role, path.settings),
            (None, _) if !self.in_device => self.builder.push_defaults(path.settings),
            _ => {}
        }
    }
}

fn attributes(
    reader: &Reader<&[u8]>,
    xml: &str,
    e: &BytesStart<'_>,
) -> Result<(Option<String>, Option<String>)> {
    let mut name = None;
    let mut val = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(reader, xml, err))?;
        let value = attr
            .unescape_value()
            .map_err(|err| xml_error(reader, xml, err))?
            .into_owned();

        match attr.key.as_ref() {
            b"name" => name = Some(value),
            b"val" => val = Some(value),
            _ => {}
        }
    }

    Ok((name, val))
}

fn xml_error(reader: &Reader<&[u8]>, xml: &str, err: impl std::fmt::Display) -> ConfigError {
    let position = (reader.buffer_position() as usize).min(xml.len());
    let line = xml.as_bytes()[..position]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1;

    ConfigError::Xml {
        line,
        message: err.to_string(),
    }
}

/// Parse a route description into an immutable [`RouteTable`]
///
/// ```xml
/// <mixer>
///   <path><ctl name="Master Switch" val="1"/></path>
///   <device name="speaker">
///     <path name="on"><ctl name="SPKOUT Switch" val="1"/></path>
///     <path name="off"><ctl name="SPKOUT Switch" val="0"/></path>
///   </device>
/// </mixer>
/// ```
pub fn parse_routes(xml: &str) -> Result<RouteTable> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut state = ParseState::default();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                let (name, val) = attributes(&reader, xml, e)?;
                state.start(e.name().as_ref(), name, val);
            }
            Ok(Event::Empty(ref e)) => {
                let (name, val) = attributes(&reader, xml, e)?;
                state.start(e.name().as_ref(), name, val);
                state.end(e.name().as_ref());
            }
            Ok(Event::End(ref e)) => {
                depth = depth.saturating_sub(1);
                state.end(e.name().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, xml, e)),
            _ => {}
        }
        buf.clear();
    }

    if depth != 0 {
        return Err(xml_error(&reader, xml, "unexpected end of document"));
    }

    let table = state.builder.build();
    debug!(
        devices = table.len(),
        defaults = table.defaults().len(),
        "Route description parsed"
    );
    Ok(table)
}

/// Read and parse a route description file
#[instrument(skip(path))]
pub fn load_routes<P: AsRef<Path>>(path: P) -> Result<RouteTable> {
    let path = path.as_ref();
    info!(path = %path.display(), "Reading route configuration");

    let contents = fs::read_to_string(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to open route configuration");
        ConfigError::Io(e)
    })?;

    parse_routes(&contents).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to parse route configuration");
        e
    })
}

/// Board properties in `build.prop` form (`key=value` per line)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(contents: &str) -> Self {
        let values = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();

        Self { values }
    }

    /// Load a property file; a missing file yields no properties
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No property file");
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// HAL-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Directory holding per-board route descriptions
    pub sound_dir: PathBuf,

    /// Property naming the board
    pub board_property: String,

    /// Route file used when the board property is unset
    pub default_board: String,

    /// Property file consulted for the board name
    pub build_prop: PathBuf,

    /// Mixer card opened by the device
    pub mixer_card: u32,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            sound_dir: PathBuf::from("/system/etc/sound"),
            board_property: "ro.product.board".to_string(),
            default_board: "tiny_hw".to_string(),
            build_prop: PathBuf::from("/system/build.prop"),
            mixer_card: 0,
        }
    }
}

impl HalConfig {
    /// Load settings from a TOML file
    #[instrument(skip(path))]
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading HAL settings");

        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;

        if config.default_board.is_empty() {
            return Err(ConfigError::Invalid("default_board must not be empty".to_string()));
        }

        debug!("HAL settings loaded successfully");
        Ok(config)
    }

    /// Location of the route description for this board
    pub fn route_file(&self, properties: &Properties) -> PathBuf {
        let board = properties
            .get(&self.board_property)
            .unwrap_or(&self.default_board);
        self.sound_dir.join(board)
    }
}
