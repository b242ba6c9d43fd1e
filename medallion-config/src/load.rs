use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::environment::Environment;

/// Overrides the directory holding the configuration files.
pub const CONFIG_DIR_ENV_NAME: &str = "MEDALLION_CONFIG_DIR";

/// Directory used when [`CONFIG_DIR_ENV_NAME`] is unset, relative to the working directory.
const DEFAULT_CONFIG_DIR: &str = "configuration";

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

const ENV_PREFIX: &str = "APP";

/// Nested keys in variables, as in `APP_WORKERS__MAX_WORKERS`.
const ENV_KEY_SEPARATOR: &str = "__";

/// Top-level configuration structures.
pub trait Config {
    /// Keys whose `APP_` variable holds a comma-separated list.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// One configuration file in the layering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// `base.*`, required.
    Base,
    /// `dev.*` or `prod.*`, applied when present.
    Environment(Environment),
    /// `local.*`, an untracked developer overlay applied last.
    Local,
}

impl ConfigLayer {
    fn stack(environment: Environment) -> [ConfigLayer; 3] {
        [
            ConfigLayer::Base,
            ConfigLayer::Environment(environment),
            ConfigLayer::Local,
        ]
    }

    fn stem(self) -> &'static str {
        match self {
            ConfigLayer::Base => "base",
            ConfigLayer::Environment(environment) => environment.as_str(),
            ConfigLayer::Local => "local",
        }
    }

    fn is_required(self) -> bool {
        matches!(self, ConfigLayer::Base)
    }

    /// First existing `{stem}.{extension}` file, or every path that was tried.
    fn locate(self, directory: &Path) -> Result<PathBuf, Vec<PathBuf>> {
        let candidates: Vec<PathBuf> = EXTENSIONS
            .iter()
            .map(|extension| directory.join(format!("{}.{extension}", self.stem())))
            .collect();

        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(candidates),
        }
    }
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLayer::Base => f.write_str("base layer"),
            ConfigLayer::Environment(environment) => write!(f, "{environment} layer"),
            ConfigLayer::Local => f.write_str("local layer"),
        }
    }
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("configuration directory `{}` does not exist", .0.display())]
    NoDirectory(PathBuf),

    #[error("no base file in `{}`, tried {}", directory.display(), list_paths(tried))]
    NoBaseFile {
        directory: PathBuf,
        tried: Vec<PathBuf>,
    },

    /// A file exists but does not parse on its own.
    #[error("invalid {layer} `{}`: {source}", path.display())]
    InvalidLayer {
        layer: ConfigLayer,
        path: PathBuf,
        #[source]
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to merge configuration layers: {0}")]
    Merge(#[source] rust_cli_config::ConfigError),

    #[error("configuration does not match the expected shape: {0}")]
    Shape(#[source] rust_cli_config::ConfigError),
}

fn list_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Loads configuration for the environment named by `APP_ENVIRONMENT`.
///
/// Files come from `MEDALLION_CONFIG_DIR`, or `./configuration` when unset. Layers apply in the
/// order base, environment, local, and `APP_`-prefixed variables override all of them.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let directory = config_directory(std::env::var_os(CONFIG_DIR_ENV_NAME), &current_dir);

    load_config_from(&directory, Environment::load()?)
}

/// Loads configuration from `directory` for `environment`.
pub fn load_config_from<T>(
    directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::NoDirectory(directory.to_path_buf()));
    }

    let mut builder = rust_cli_config::Config::builder();
    for layer in ConfigLayer::stack(environment) {
        let path = match layer.locate(directory) {
            Ok(path) => path,
            Err(tried) if layer.is_required() => {
                return Err(LoadConfigError::NoBaseFile {
                    directory: directory.to_path_buf(),
                    tried,
                });
            }
            Err(_) => {
                debug!(%layer, "configuration layer not present");
                continue;
            }
        };

        check_layer(layer, &path)?;
        debug!(%layer, path = %path.display(), "applying configuration layer");
        builder = builder.add_source(rust_cli_config::File::from(path));
    }

    builder
        .add_source(variable_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Merge)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Shape)
}

/// Resolves the configuration directory from the override variable and the working directory.
fn config_directory(override_dir: Option<OsString>, current_dir: &Path) -> PathBuf {
    match override_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => current_dir.join(dir),
        None => current_dir.join(DEFAULT_CONFIG_DIR),
    }
}

/// Parses one file in isolation so a syntax error names the file it came from.
fn check_layer(layer: ConfigLayer, path: &Path) -> Result<(), LoadConfigError> {
    rust_cli_config::Config::builder()
        .add_source(rust_cli_config::File::from(path))
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::InvalidLayer {
            layer,
            path: path.to_path_buf(),
            source,
        })
}

fn variable_overrides<T: Config>() -> rust_cli_config::Environment {
    let overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_KEY_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return overrides;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        overrides.try_parsing(true).list_separator(","),
        |overrides, key| overrides.with_list_parse_key(key),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        workers: u16,
    }

    impl Config for Sample {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "name: base\nworkers: 2\n").unwrap();
        fs::write(dir.path().join("prod.json"), r#"{"workers": 8}"#).unwrap();

        let sample: Sample = load_config_from(dir.path(), Environment::Prod).unwrap();

        assert_eq!(sample.name, "base");
        assert_eq!(sample.workers, 8);
    }

    #[test]
    fn local_overlay_is_applied_last() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "name: base\nworkers: 2\n").unwrap();
        fs::write(dir.path().join("dev.yaml"), "workers: 4\n").unwrap();
        fs::write(dir.path().join("local.yml"), "name: laptop\nworkers: 1\n").unwrap();

        let sample: Sample = load_config_from(dir.path(), Environment::Dev).unwrap();

        assert_eq!(sample.name, "laptop");
        assert_eq!(sample.workers, 1);
    }

    #[test]
    fn missing_environment_file_falls_back_to_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "name: base\nworkers: 2\n").unwrap();

        let sample: Sample = load_config_from(dir.path(), Environment::Dev).unwrap();

        assert_eq!(sample.workers, 2);
    }

    #[test]
    fn missing_base_file_lists_the_tried_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dev.yaml"), "workers: 4\n").unwrap();

        let err = load_config_from::<Sample>(dir.path(), Environment::Dev).unwrap_err();

        match &err {
            LoadConfigError::NoBaseFile { tried, .. } => assert_eq!(tried.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("base.yml"));
    }

    #[test]
    fn malformed_file_names_its_layer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), "name: base\nworkers: 2\n").unwrap();
        fs::write(dir.path().join("prod.json"), "{\"workers\": ").unwrap();

        let err = load_config_from::<Sample>(dir.path(), Environment::Prod).unwrap_err();

        match err {
            LoadConfigError::InvalidLayer { layer, path, .. } => {
                assert_eq!(layer, ConfigLayer::Environment(Environment::Prod));
                assert!(path.ends_with("prod.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_config_from::<Sample>(&dir.path().join("nope"), Environment::Dev)
            .unwrap_err();

        assert!(matches!(err, LoadConfigError::NoDirectory(_)));
    }

    #[test]
    fn config_directory_honours_the_override() {
        let cwd = Path::new("/srv/medallion");

        assert_eq!(
            config_directory(None, cwd),
            PathBuf::from("/srv/medallion/configuration")
        );
        assert_eq!(
            config_directory(Some(OsString::new()), cwd),
            PathBuf::from("/srv/medallion/configuration")
        );
        assert_eq!(
            config_directory(Some(OsString::from("/etc/medallion")), cwd),
            PathBuf::from("/etc/medallion")
        );
        assert_eq!(
            config_directory(Some(OsString::from("conf")), cwd),
            PathBuf::from("/srv/medallion/conf")
        );
    }
}
