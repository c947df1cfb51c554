use std::path::{Path, PathBuf};

use libexo_core::error::ExoError;
pub use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub static CONFIG_FILE_ENV_VAR: &str = "EXO_CONFIG";
pub static CONFIG_ENV_PREFIX: &str = "EXO";
pub static CONFIG_ENV_SEPARATOR: &str = "_";

/// A section of the configuration file, e.g. `[log]` or `[exploit]`.
pub trait Config: DeserializeOwned + Serialize {
    fn section_name() -> &'static str;

    fn load() -> Result<Self, ExoError> {
        ConfigLoader::load_cfg(None, Self::section_name())
    }

    fn load_from(file: &Path) -> Result<Self, ExoError> {
        ConfigLoader::load_cfg(Some(file), Self::section_name())
    }

    fn load_or_default() -> Result<Self, ExoError>
    where
        Self: Default,
    {
        ConfigLoader::load_cfg_or_default(
            None,
            Self::section_name(),
            Self::default(),
        )
    }

    fn load_from_or_default(file: &Path) -> Result<Self, ExoError>
    where
        Self: Default,
    {
        ConfigLoader::load_cfg_or_default(
            Some(file),
            Self::section_name(),
            Self::default(),
        )
    }

    fn must_load() -> Self {
        Self::load().expect("failed to load config")
    }

    fn must_load_or_default() -> Self
    where
        Self: Default,
    {
        Self::load_or_default().expect("failed to load config")
    }
}

pub struct ConfigLoader {}

impl ConfigLoader {
    fn config_file(file: Option<&Path>) -> PathBuf {
        file.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var(CONFIG_FILE_ENV_VAR)
                .unwrap_or_else(|_| "config.toml".to_string())
                .into()
        })
    }

    /// Sources by increasing priority: defaults, config file, environment.
    fn build(
        file: Option<&Path>,
        default: Option<config::Config>,
    ) -> Result<config::Config, ExoError> {
        let config_file = Self::config_file(file);
        let mut builder = config::Config::builder();
        if let Some(default) = default {
            builder = builder.add_source(default);
        }
        builder
            .add_source(
                config::File::new(
                    &config_file.to_string_lossy(),
                    config::FileFormat::Toml,
                )
                .required(file.is_some()),
            )
            .add_source(
                config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator(CONFIG_ENV_SEPARATOR),
            )
            .build()
            .map_err(|e| {
                ExoError::Config(format!("failed to build config: {}", e))
            })
    }

    pub fn load_cfg_or_default<T: Config>(
        file: Option<&Path>,
        section: &str,
        default: T,
    ) -> Result<T, ExoError> {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert(
            section.to_string(),
            serde_json::to_value(&default).map_err(|e| {
                ExoError::Config(format!("failed to encode default: {}", e))
            })?,
        );
        let default_source = config::Config::try_from(&wrapped)
            .map_err(|e| {
                ExoError::Config(format!("failed to load default config: {}", e))
            })?;
        let cfg = Self::build(file, Some(default_source))?;
        let c: T = cfg.get(section).or_else(|e| match e {
            config::ConfigError::NotFound(_) => Ok(default),
            _ => Err(ExoError::Config(format!("{}", e))),
        })?;
        Ok(c)
    }

    pub fn load_cfg<T: Config>(
        file: Option<&Path>,
        section: &str,
    ) -> Result<T, ExoError> {
        let cfg = Self::build(file, None)?;
        let c: T = cfg
            .get(section)
            .map_err(|e| ExoError::Config(format!("{}", e)))?;
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, CONFIG_ENV_PREFIX, CONFIG_ENV_SEPARATOR};
    use crate::config::{ConfigLoader, CONFIG_FILE_ENV_VAR};
    use libexo_core::error::ExoError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(
        Debug, Clone, Eq, PartialEq, Default, serde::Deserialize, serde::Serialize,
    )]
    struct TestConfig {
        test: String,
    }
    impl Config for TestConfig {
        fn section_name() -> &'static str {
            "abc"
        }
    }

    #[test]
    fn test_load_cfg_from_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_txt = r#"
        [abc]
        test = "abc"
        "#;
        file.write_all(config_txt.as_bytes()).unwrap();
        let cfg = TestConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.test, "abc");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let cfg = TestConfig::load_from(std::path::Path::new(
            "/dev/non_exist/config.toml",
        ));
        assert!(matches!(cfg, Err(ExoError::Config(_))));
    }

    #[test]
    fn test_default_when_section_missing() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[other]\nkey = 1\n").unwrap();
        let cfg = TestConfig::load_from_or_default(file.path()).unwrap();
        assert_eq!(cfg, TestConfig::default());
    }

    #[test]
    #[ignore = "Run this test together with others will fail. But run it alone will pass."]
    fn test_load_cfg() {
        let mut file = NamedTempFile::new().unwrap();
        let config_txt = r#"
        [abc]
        test = "abc"
        "#;
        file.write_all(config_txt.as_bytes()).unwrap();
        std::env::set_var(CONFIG_FILE_ENV_VAR, file.path().as_os_str());
        let cfg: TestConfig =
            ConfigLoader::load_cfg_or_default(None, "abc", Default::default())
                .unwrap();
        assert_eq!(cfg.test, "abc");
        std::env::remove_var(CONFIG_FILE_ENV_VAR);
    }

    #[test]
    #[ignore = "Run this test together with others will fail. But run it alone will pass."]
    fn test_env_override() {
        std::env::set_var(
            CONFIG_ENV_PREFIX.to_owned()
                + CONFIG_ENV_SEPARATOR
                + "abc"
                + CONFIG_ENV_SEPARATOR
                + "test",
            "def",
        );
        let cfg = TestConfig::load_or_default().unwrap();
        assert_eq!(cfg.test, "def")
    }

    #[test]
    #[ignore = "Run this test together with others will fail. But run it alone will pass."]
    fn test_no_default() {
        std::env::set_var(CONFIG_FILE_ENV_VAR, "/dev/non_exist");
        let cfg: Result<TestConfig, ExoError> = TestConfig::load();
        assert!(cfg.is_err());
        std::env::remove_var(CONFIG_FILE_ENV_VAR);
    }
}
