//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod mixer;
pub mod routing;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioConfig, AudioError, AudioFormat, DeviceMask, Direction, PcmConfig, PcmFormat, PcmProfile,
};
pub use config::{load_routes, parse_routes, ConfigError, HalConfig, Properties};
pub use mixer::{ControlSequencer, ControlSetting, ControlValue, Mixer, MixerControl};
pub use routing::{ActiveRouteState, DeviceRouteEntry, PathRole, RouteTable, RouteTableBuilder, Router};
