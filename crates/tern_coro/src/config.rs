//! Target configuration for the goroutine lowering.
//!
//! The configuration is the slice of a target description that the
//! lowering cares about: which scheduler flavour the runtime was built
//! with, how cooperative the platform is, and the pointer width. It can be
//! embedded in a target JSON file and loaded with [`Config::load`].

use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scheduler flavour
// ---------------------------------------------------------------------------

/// Which scheduler implementation the runtime provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    /// Blocking functions become compiler-built coroutines; portable, and
    /// the only option where stacks cannot be switched.
    Coroutines,
    /// Goroutines run on switched stacks; the compiler only wires up the
    /// entry point.
    Tasks,
}

// ---------------------------------------------------------------------------
// Platform class
// ---------------------------------------------------------------------------

/// How the target platform relates to blocking and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Ordinary hosted target.
    Native,
    /// Embedder-driven target where blocking the calling context stalls the
    /// host (a browser main thread, for instance). Always cooperative.
    Browser,
    /// Bare-metal target with no scheduler at all; blocking operations
    /// degrade to busy waits.
    Bare,
}

impl Platform {
    /// Whether the platform is cooperative-only, so a scheduler is needed
    /// regardless of what the program spawns.
    pub fn always_needs_scheduler(self) -> bool {
        matches!(self, Platform::Browser)
    }

    /// Whether the platform has no scheduler to offer.
    pub fn never_schedules(self) -> bool {
        matches!(self, Platform::Bare)
    }

    /// The short name used in target files.
    pub fn config_name(self) -> &'static str {
        match self {
            Platform::Native => "native",
            Platform::Browser => "browser",
            Platform::Bare => "bare",
        }
    }
}

// ---------------------------------------------------------------------------
// Pointer width
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerWidth {
    #[serde(rename = "16")]
    Bits16,
    #[serde(rename = "32")]
    Bits32,
    #[serde(rename = "64")]
    Bits64,
}

impl PointerWidth {
    pub fn bits(self) -> u32 {
        match self {
            PointerWidth::Bits16 => 16,
            PointerWidth::Bits32 => 32,
            PointerWidth::Bits64 => 64,
        }
    }
}

fn default_pointer_width() -> PointerWidth {
    PointerWidth::Bits64
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: Scheduler,
    pub platform: Platform,
    #[serde(default = "default_pointer_width")]
    pub pointer_width: PointerWidth,
    /// Whether the garbage collector scans stack roots, in which case heap
    /// pointers kept alive across calls must be registered.
    #[serde(default)]
    pub needs_stack_objects: bool,
}

impl Config {
    /// The configuration for an ordinary hosted 64-bit target.
    pub fn native() -> Config {
        Config {
            scheduler: Scheduler::Coroutines,
            platform: Platform::Native,
            pointer_width: PointerWidth::Bits64,
            needs_stack_objects: false,
        }
    }

    /// Parse a configuration from target JSON.
    pub fn from_json(text: &str) -> Result<Config, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid target config: {}", e))
    }

    /// Load a configuration from a target JSON file.
    pub fn load(path: &Path) -> Result<Config, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Config::from_json(&content)
    }
}
