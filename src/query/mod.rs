//! Projections of the distro settings for CI workflow matrices.

use std::str::FromStr;

use clap::ValueEnum;
use eyre::{eyre, Result};
use serde_json::{json, Map, Value};
use strum::{Display, EnumIter, EnumMessage, EnumString, IntoEnumIterator};

use crate::util::config::DistroSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, EnumMessage)]
#[strum(serialize_all = "snake_case")]
pub enum QueryKey {
    #[strum(message = "Main matrix used in GitHub Actions")]
    GithubMainMatrix,
    #[strum(message = "OS matrix used in GitHub Actions")]
    GithubOsMatrix,
    #[strum(message = "List of Docker images")]
    DockerImages,
}

impl QueryKey {
    pub fn parse(key: &str) -> Result<Self> {
        QueryKey::from_str(key).map_err(|_| eyre!("no such query key \"{key}\""))
    }

    /// `<key>:  <description>` for every key.
    pub fn list() -> Vec<String> {
        QueryKey::iter()
            .map(|key| format!("{key}:  {}", key.get_message().unwrap_or_default()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON for objects and lists, plain text otherwise
    #[default]
    Auto,
    Str,
    Json,
    Yaml,
}

pub struct Query<'a> {
    settings: &'a DistroSettings,
}

impl<'a> Query<'a> {
    pub fn new(settings: &'a DistroSettings) -> Self {
        Self { settings }
    }

    pub fn value(&self, key: QueryKey) -> Result<Value> {
        match key {
            QueryKey::GithubMainMatrix => self.github_main_matrix(),
            QueryKey::GithubOsMatrix => self.github_os_matrix(),
            QueryKey::DockerImages => Ok(self.docker_images()),
        }
    }

    /// One entry per allowed combination: the distro entry plus
    /// `architecture` and `vendorLower`.
    fn github_main_matrix(&self) -> Result<Value> {
        let mut include = vec![];
        for combination in self.settings.unique_combinations() {
            let Some(distro) = self.settings.distro(&combination.os_release) else {
                continue;
            };
            let mut entry = object(serde_json::to_value(distro)?)?;
            entry.insert("architecture".into(), json!(combination.architecture));
            entry.insert("vendorLower".into(), json!(distro.vendor.to_lowercase()));
            include.push(Value::Object(entry));
        }
        Ok(json!({ "include": include }))
    }

    /// Every distro entry, merged with the settings' other top-level keys.
    fn github_os_matrix(&self) -> Result<Value> {
        let mut common = object(serde_json::to_value(self.settings)?)?;
        common.remove("osDistros");
        common.remove("allowedCombinations");

        let mut distros = vec![];
        for distro in &self.settings.os_distros {
            let mut entry = object(serde_json::to_value(distro)?)?;
            entry.extend(common.clone());
            distros.push(Value::Object(entry));
        }
        Ok(Value::Array(distros))
    }

    fn docker_images(&self) -> Value {
        self.settings
            .combinations()
            .iter()
            .map(|armed| Value::String(self.settings.image_name(armed)))
            .collect()
    }

    pub fn render(&self, key: QueryKey, format: OutputFormat, pretty: bool) -> Result<String> {
        render(&self.value(key)?, format, pretty)
    }
}

pub fn render(value: &Value, format: OutputFormat, pretty: bool) -> Result<String> {
    let format = match format {
        OutputFormat::Auto if value.is_array() || value.is_object() => OutputFormat::Json,
        format => format,
    };

    Ok(match format {
        OutputFormat::Json if pretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?.trim_end().to_string(),
        OutputFormat::Str | OutputFormat::Auto => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    })
}

fn object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(eyre!("expected an object, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[ctor::ctor]
    fn init() {
        crate::util::test_init();
    }

    const SETTINGS: &str = indoc! {r#"
        package: machinekit-hal
        projectName: Machinekit-HAL
        githubRepository: machinekit/machinekit-hal
        osDistros:
          - osRelease: 10
            codename: Buster
            vendor: Debian
            baseImage: debian:buster
          - osRelease: "20.04"
            codename: focal
            vendor: Ubuntu
            baseImage: ubuntu:focal
        allowedCombinations:
          - osRelease: 10
            architecture: amd64
          - osRelease: 20.04
            architecture: arm64
    "#};

    fn settings() -> DistroSettings {
        DistroSettings::from_yaml(SETTINGS).unwrap()
    }

    #[test]
    fn test_keys() {
        assert_eq!(QueryKey::parse("docker_images").unwrap(), QueryKey::DockerImages);
        assert!(QueryKey::parse("nope").is_err());
        assert_eq!(
            QueryKey::list(),
            vec![
                "github_main_matrix:  Main matrix used in GitHub Actions",
                "github_os_matrix:  OS matrix used in GitHub Actions",
                "docker_images:  List of Docker images",
            ]
        );
    }

    #[test]
    fn test_github_main_matrix() -> Result<()> {
        let settings = settings();
        let value = Query::new(&settings).value(QueryKey::GithubMainMatrix)?;

        assert_eq!(
            value,
            json!({"include": [
                {
                    "osRelease": "10",
                    "codename": "Buster",
                    "vendor": "Debian",
                    "baseImage": "debian:buster",
                    "architecture": "amd64",
                    "vendorLower": "debian",
                },
                {
                    "osRelease": "20.04",
                    "codename": "focal",
                    "vendor": "Ubuntu",
                    "baseImage": "ubuntu:focal",
                    "architecture": "arm64",
                    "vendorLower": "ubuntu",
                },
            ]})
        );

        Ok(())
    }

    #[test]
    fn test_github_os_matrix_merges_top_level_keys() -> Result<()> {
        let settings = settings();
        let value = Query::new(&settings).value(QueryKey::GithubOsMatrix)?;

        let distros = value.as_array().unwrap();
        assert_eq!(distros.len(), 2);
        for distro in distros {
            assert_eq!(distro["package"], "machinekit-hal");
            assert_eq!(distro["projectName"], "Machinekit-HAL");
            assert_eq!(distro["githubRepository"], "machinekit/machinekit-hal");
            assert!(distro.get("osDistros").is_none());
            assert!(distro.get("allowedCombinations").is_none());
        }
        assert_eq!(distros[1]["codename"], "focal");

        Ok(())
    }

    #[test]
    fn test_repeated_combinations_appear_once() -> Result<()> {
        let yaml = format!("{SETTINGS}  - osRelease: 10\n    architecture: amd64\n");
        let settings = DistroSettings::from_yaml(&yaml)?;
        let query = Query::new(&settings);

        let matrix = query.value(QueryKey::GithubMainMatrix)?;
        assert_eq!(matrix["include"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            query.value(QueryKey::DockerImages)?,
            json!(["machinekit-hal-debian-builder", "machinekit-hal-ubuntu-builder"])
        );

        Ok(())
    }

    #[test]
    fn test_docker_images() -> Result<()> {
        let settings = settings();
        let value = Query::new(&settings).value(QueryKey::DockerImages)?;

        assert_eq!(
            value,
            json!(["machinekit-hal-debian-builder", "machinekit-hal-ubuntu-builder"])
        );

        Ok(())
    }

    #[test]
    fn test_render_formats() -> Result<()> {
        let list = json!(["a", "b"]);

        assert_eq!(render(&list, OutputFormat::Auto, false)?, r#"["a","b"]"#);
        assert_eq!(render(&list, OutputFormat::Json, true)?, "[\n  \"a\",\n  \"b\"\n]");
        assert_eq!(render(&list, OutputFormat::Yaml, false)?, "- a\n- b");
        assert_eq!(render(&json!("plain"), OutputFormat::Auto, false)?, "plain");
        assert_eq!(render(&json!("plain"), OutputFormat::Json, false)?, "\"plain\"");

        Ok(())
    }
}
