//! Configuration for medallion pipelines.
//!
//! Holds the typed table and DAG definitions consumed by the Bronze and Silver layers,
//! the runner configuration, and the hierarchical loader shared by binaries.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{
    CONFIG_DIR_ENV_NAME, Config, ConfigLayer, LoadConfigError, load_config, load_config_from,
};
