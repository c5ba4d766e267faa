//! Safety Center Configuration
//!
//! Read-only inputs of the engine:
//! - [`SafetyCenterConfig`]: which sources exist, how they are grouped and
//!   which package owns them, with the derived [`Broadcast`] topology
//! - [`SafetyCenterFlags`]: tunable policy (timeouts, resurfacing,
//!   untracked sources, category allowlists)
//!
//! Both can be loaded from one TOML document with [`load_from_path`].

#![warn(unreachable_pub)]

mod broadcast;
mod config;
mod error;
mod flags;
mod source;

pub use broadcast::Broadcast;
pub use config::{load_from_path, load_from_str, ConfigFile, SafetyCenterConfig};
pub use error::ConfigError;
pub use flags::{
    CategoryAllowlist, ReasonTimeout, ResurfacePolicy, SafetyCenterFlags, SeverityValues,
};
pub use source::{InitialDisplayState, Profile, SafetySource, SafetySourcesGroup, SourceKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
