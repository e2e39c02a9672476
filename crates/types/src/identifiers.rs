//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Simulated host identifier. Hosts are numbered `0..host_count`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct HostId(pub u64);

impl HostId {
    /// The certname this host reports under.
    pub fn certname(self) -> String {
        format!("host-{}", self.0)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host({})", self.0)
    }
}

/// The three kinds of command the simulator knows how to produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Facts,
    Reports,
    Catalogs,
}

impl CommandKind {
    /// All kinds, in corpus classification order.
    pub const ALL: [CommandKind; 3] = [
        CommandKind::Facts,
        CommandKind::Reports,
        CommandKind::Catalogs,
    ];

    /// Path marker used to classify sample files on disk.
    pub fn dir_name(self) -> &'static str {
        match self {
            CommandKind::Facts => "facts",
            CommandKind::Reports => "reports",
            CommandKind::Catalogs => "catalogs",
        }
    }

    /// Command name on the wire.
    pub fn command_name(self) -> &'static str {
        match self {
            CommandKind::Facts => "replace_facts",
            CommandKind::Reports => "store_report",
            CommandKind::Catalogs => "replace_catalog",
        }
    }

    /// Command version on the wire. Fixed per kind.
    pub fn version(self) -> u32 {
        match self {
            CommandKind::Facts => 4,
            CommandKind::Reports => 7,
            CommandKind::Catalogs => 9,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Error parsing a [`CommandKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for CommandKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "facts" | "replace_facts" => Ok(CommandKind::Facts),
            "reports" | "store_report" => Ok(CommandKind::Reports),
            "catalogs" | "replace_catalog" => Ok(CommandKind::Catalogs),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}
