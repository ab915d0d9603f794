//! Store configuration module.
//!
//! Configuration is loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `ASSEMBLY_DATABASE_PATH`: database file (default: `./assembly.db`)
//! - `ASSEMBLY_CACHE_CAPACITY`: resident cached items (default: `4096`)
//! - `ASSEMBLY_NODE_FORMAT`: `varint` / `2` (default) or `fixed32` / `1`
//! - `ASSEMBLY_BTREE_MAX`: maximum entries per index node (default: `4000`, `4` to `65535`)
//! - `ASSEMBLY_MIGRATE_ON_OPEN`: `true` or `false` (default: `false`)
//!
//! # Invariants
//!
//! - `cache_capacity` is at least one
//! - `btree_max` is accepted by `TreeOrder::new`

use std::path::PathBuf;

use crate::database::StoreOptions;
use crate::storage::btree::{BTREE_MAX, NodeFormat, TreeOrder};
use crate::storage::cache::DEFAULT_CAPACITY;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the database file.
    pub database_path: PathBuf,
    pub cache_capacity: usize,
    pub node_format: NodeFormat,
    pub btree_max: usize,
    pub migrate_on_open: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

const PATH_VAR: &str = "ASSEMBLY_DATABASE_PATH";
const CAPACITY_VAR: &str = "ASSEMBLY_CACHE_CAPACITY";
const FORMAT_VAR: &str = "ASSEMBLY_NODE_FORMAT";
const BTREE_MAX_VAR: &str = "ASSEMBLY_BTREE_MAX";
const MIGRATE_VAR: &str = "ASSEMBLY_MIGRATE_ON_OPEN";

impl StoreConfig {
    /// Default database file.
    pub const DEFAULT_DATABASE_PATH: &'static str = "./assembly.db";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is set to a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_path = lookup(PATH_VAR)
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATABASE_PATH), PathBuf::from);

        let cache_capacity = match lookup(CAPACITY_VAR) {
            Some(value) => match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => return Err(invalid(CAPACITY_VAR, format!("'{value}' is not a positive integer"))),
            },
            None => DEFAULT_CAPACITY,
        };

        let node_format = match lookup(FORMAT_VAR) {
            Some(value) => parse_node_format(&value)?,
            None => NodeFormat::default(),
        };

        let btree_max = match lookup(BTREE_MAX_VAR) {
            Some(value) => value
                .parse::<usize>()
                .ok()
                .filter(|&max| TreeOrder::new(max).is_ok())
                .ok_or_else(|| {
                    invalid(
                        BTREE_MAX_VAR,
                        format!(
                            "'{value}' must be an integer from {} to {}",
                            TreeOrder::MIN_MAX,
                            TreeOrder::MAX_MAX
                        ),
                    )
                })?,
            None => BTREE_MAX,
        };

        let migrate_on_open = match lookup(MIGRATE_VAR) {
            Some(value) => parse_bool(MIGRATE_VAR, &value)?,
            None => false,
        };

        Ok(Self {
            database_path,
            cache_capacity,
            node_format,
            btree_max,
            migrate_on_open,
        })
    }

    /// Connection options for this configuration.
    pub fn options(&self) -> Result<StoreOptions, ConfigError> {
        let order = TreeOrder::new(self.btree_max)
            .map_err(|e| invalid(BTREE_MAX_VAR, e.to_string()))?;
        Ok(StoreOptions {
            cache_capacity: self.cache_capacity,
            node_format: self.node_format,
            migrate_on_open: self.migrate_on_open,
            order,
        })
    }
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

fn parse_node_format(value: &str) -> Result<NodeFormat, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "fixed32" | "1" => Ok(NodeFormat::Fixed32),
        "varint" | "2" => Ok(NodeFormat::Varint),
        _ => Err(invalid(
            FORMAT_VAR,
            format!("'{value}' is not a node format (fixed32 or varint)"),
        )),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(name, format!("'{value}' is not true or false"))),
    }
}
