use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use eyre::Result;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::*;

/// Name of the settings file inside a repository's `.github/` directory.
pub const SETTINGS_FILE: &str = "debian-distro-settings.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file '{0}' not found")]
    NotFound(PathBuf),

    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("allowed combination {architecture} {os_release} matches {matches} distros, expected exactly one")]
    DanglingCombination {
        os_release: String,
        architecture: String,
        matches: usize,
    },

    #[error("wanted combination of {version} {architecture} is not possible to build")]
    Combination {
        version: String,
        architecture: String,
    },

    #[error("{0} unset in environment")]
    UnsetVariable(String),
}

/// The parsed `debian-distro-settings.yaml`.
///
/// Field names follow the YAML keys; the optional ones fall back to defaults
/// through the accessor methods. Keys this crate does not know about are kept
/// in `extra` so they can be projected by `query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroSettings {
    pub package: String,
    pub project_name: String,
    pub os_distros: Vec<DistroEntry>,
    pub allowed_combinations: Vec<AllowedCombination>,

    #[serde(rename = "label_prefix", default, skip_serializing_if = "Option::is_none")]
    label_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_dir: Option<PathBuf>,
    #[serde(rename = "debian_dir", default, skip_serializing_if = "Option::is_none")]
    debian_dir: Option<PathBuf>,
    #[serde(
        rename = "docker_context_path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    docker_context_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script_pre_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script_post_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configure_source_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_name_fmt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_tag_fmt: Option<String>,
    #[serde(
        rename = "cloudsmith_repo_slug",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    cloudsmith_repo_slug: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistroEntry {
    #[serde(rename = "osRelease", deserialize_with = "release_string")]
    pub os_release: String,
    pub codename: String,
    pub vendor: String,
    #[serde(rename = "baseImage")]
    pub base_image: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedCombination {
    #[serde(rename = "osRelease", deserialize_with = "release_string")]
    pub os_release: String,
    pub architecture: String,
}

/// An OS release and architecture picked out of the allowed combinations.
/// All image names, tags and registry references are derived from one of
/// these, so they always agree with each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedCombination {
    pub base_image: String,
    pub architecture: String,
    pub vendor: String,
    pub os_release: String,
    pub codename: String,
}

/// `osRelease` may be written as `20.04` or `"20.04"`; both end up as the
/// same string.
fn release_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Release {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(match Release::deserialize(deserializer)? {
        Release::Text(text) => text.trim().to_string(),
        Release::Integer(n) => n.to_string(),
        Release::Float(n) => n.to_string(),
    })
}

impl DistroSettings {
    /// Load the settings file from a repository's `.github/` directory.
    pub async fn load(github_dir: &Path) -> Result<Self> {
        let path = github_dir.join(SETTINGS_FILE);
        info!("loading distro settings from {}", path.display());
        if !path.exists() {
            return Err(ConfigError::NotFound(path).into());
        }

        let mut file = File::open(&path).await?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).await?;

        Self::parse(&buf).map_err(|source| match source {
            ParseFailure::Yaml(source) => ConfigError::Parse { path, source }.into(),
            ParseFailure::Invalid(e) => e.into(),
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::parse(yaml).map_err(|e| match e {
            ParseFailure::Yaml(e) => e.into(),
            ParseFailure::Invalid(e) => e.into(),
        })
    }

    fn parse(yaml: &str) -> std::result::Result<Self, ParseFailure> {
        let settings: DistroSettings = serde_yaml::from_str(yaml).map_err(ParseFailure::Yaml)?;
        settings.check_combinations().map_err(ParseFailure::Invalid)?;
        debug!(
            "loaded {} distros and {} combinations for {}",
            settings.os_distros.len(),
            settings.allowed_combinations.len(),
            settings.package
        );
        Ok(settings)
    }

    fn check_combinations(&self) -> std::result::Result<(), ConfigError> {
        for combination in &self.allowed_combinations {
            let matches = self
                .os_distros
                .iter()
                .filter(|d| d.os_release == combination.os_release)
                .count();
            if matches != 1 {
                return Err(ConfigError::DanglingCombination {
                    os_release: combination.os_release.clone(),
                    architecture: combination.architecture.clone(),
                    matches,
                });
            }
        }
        Ok(())
    }

    /// Select a version (codename or release number) and architecture.
    ///
    /// The codename is compared case-insensitively, the release exactly; the
    /// resulting release/architecture pair must be listed in
    /// `allowedCombinations`.
    pub fn arm(&self, version: &str, architecture: &str) -> Result<ArmedCombination, ConfigError> {
        let version = version.trim();
        for distro in &self.os_distros {
            if !distro.codename.eq_ignore_ascii_case(version) && distro.os_release != version {
                continue;
            }

            let found = self.allowed_combinations.iter().find(|c| {
                c.os_release == distro.os_release && c.architecture.eq_ignore_ascii_case(architecture)
            });
            if let Some(combination) = found {
                let armed = ArmedCombination {
                    base_image: distro.base_image.to_lowercase(),
                    architecture: combination.architecture.to_lowercase(),
                    vendor: distro.vendor.to_lowercase(),
                    os_release: distro.os_release.clone(),
                    codename: distro.codename.to_lowercase(),
                };
                debug!("armed {} {}", armed.codename, armed.architecture);
                return Ok(armed);
            }
        }

        Err(ConfigError::Combination {
            version: version.into(),
            architecture: architecture.into(),
        })
    }

    /// Allowed combinations in file order, each release/architecture pair
    /// once.
    pub fn unique_combinations(&self) -> Vec<&AllowedCombination> {
        let mut seen = BTreeSet::new();
        self.allowed_combinations
            .iter()
            .filter(|c| seen.insert((c.os_release.as_str(), c.architecture.as_str())))
            .collect()
    }

    /// Every allowed combination, armed, in file order.
    pub fn combinations(&self) -> Vec<ArmedCombination> {
        self.unique_combinations()
            .into_iter()
            .filter_map(|c| self.arm(&c.os_release, &c.architecture).ok())
            .collect()
    }

    pub fn distro(&self, os_release: &str) -> Option<&DistroEntry> {
        self.os_distros.iter().find(|d| d.os_release == os_release)
    }

    pub fn label_prefix(&self) -> String {
        self.label_prefix
            .clone()
            .unwrap_or_else(|| format!("io.machinekit.{}", self.package))
    }

    pub fn image_hash_label(&self) -> String {
        format!("{}.image_hash", self.label_prefix())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| ".".into())
    }

    pub fn debian_dir(&self) -> PathBuf {
        self.debian_dir.clone().unwrap_or_else(|| "debian".into())
    }

    pub fn script_pre_cmd(&self) -> Option<&str> {
        self.script_pre_cmd.as_deref()
    }

    pub fn script_post_cmd(&self) -> Option<&str> {
        self.script_post_cmd.as_deref()
    }

    pub fn configure_source_cmd(&self) -> Option<&str> {
        self.configure_source_cmd.as_deref()
    }

    pub fn cloudsmith_repo_slug(&self) -> String {
        self.cloudsmith_repo_slug
            .clone()
            .unwrap_or_else(|| self.package.clone())
    }

    /// Expand `@PACKAGE@`, `@VENDOR@`, `@ARCHITECTURE@`, `@OSRELEASE@` and
    /// `@CODENAME@`.
    pub fn template(&self, format: &str, armed: &ArmedCombination) -> String {
        [
            ("@PACKAGE@", self.package.as_str()),
            ("@VENDOR@", armed.vendor.as_str()),
            ("@ARCHITECTURE@", armed.architecture.as_str()),
            ("@OSRELEASE@", armed.os_release.as_str()),
            ("@CODENAME@", armed.codename.as_str()),
        ]
        .iter()
        .fold(format.to_string(), |acc, (key, value)| acc.replace(key, value))
    }

    pub fn image_name(&self, armed: &ArmedCombination) -> String {
        let fmt = self
            .image_name_fmt
            .as_deref()
            .unwrap_or("@PACKAGE@-@VENDOR@-builder");
        self.template(fmt, armed)
    }

    pub fn image_tag(&self, armed: &ArmedCombination) -> String {
        let fmt = self
            .image_tag_fmt
            .as_deref()
            .unwrap_or("@OSRELEASE@_@ARCHITECTURE@");
        self.template(fmt, armed)
    }
}

enum ParseFailure {
    Yaml(serde_yaml::Error),
    Invalid(ConfigError),
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[ctor::ctor]
    fn init() {
        crate::util::test_init();
    }

    const FOCAL: &str = indoc! {r#"
        package: mkfoo
        projectName: Foo
        osDistros:
          - osRelease: 20.04
            codename: Focal
            vendor: Ubuntu
            baseImage: ubuntu:focal
          - osRelease: 10
            codename: buster
            vendor: Debian
            baseImage: debian:buster
        allowedCombinations:
          - osRelease: 20.04
            architecture: amd64
          - osRelease: "10"
            architecture: ARMHF
        matrixExtra: kept
    "#};

    #[test]
    fn test_codename_and_release_arm_the_same_entry() -> Result<()> {
        let settings = DistroSettings::from_yaml(FOCAL)?;

        let by_codename = settings.arm("focal", "amd64")?;
        let by_release = settings.arm("20.04", "amd64")?;
        assert_eq!(by_codename, by_release);
        assert_eq!(by_codename.codename, "focal");
        assert_eq!(by_codename.vendor, "ubuntu");
        assert_eq!(by_codename.base_image, "ubuntu:focal");

        Ok(())
    }

    #[test]
    fn test_disallowed_combination_is_rejected() -> Result<()> {
        let settings = DistroSettings::from_yaml(FOCAL)?;

        assert!(matches!(
            settings.arm("focal", "arm64"),
            Err(ConfigError::Combination { .. })
        ));
        assert!(settings.arm("jammy", "amd64").is_err());
        assert!(settings.arm("buster", "amd64").is_err());

        Ok(())
    }

    #[test]
    fn test_numeric_and_string_releases_match() -> Result<()> {
        let settings = DistroSettings::from_yaml(FOCAL)?;

        let armed = settings.arm("BUSTER", "armhf")?;
        assert_eq!(armed.os_release, "10");
        assert_eq!(armed.architecture, "armhf");
        assert_eq!(settings.arm("10", "ArmHF")?, armed);

        Ok(())
    }

    #[test]
    fn test_dangling_combination_fails_to_load() {
        let yaml = indoc! {r#"
            package: mkfoo
            projectName: Foo
            osDistros:
              - osRelease: 11
                codename: bullseye
                vendor: Debian
                baseImage: debian:bullseye
            allowedCombinations:
              - osRelease: 12
                architecture: amd64
        "#};

        let err = DistroSettings::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("matches 0 distros"));
    }

    #[test]
    fn test_ambiguous_combination_fails_to_load() {
        let yaml = indoc! {r#"
            package: mkfoo
            projectName: Foo
            osDistros:
              - osRelease: 11
                codename: bullseye
                vendor: Debian
                baseImage: debian:bullseye
              - osRelease: "11"
                codename: bullseye-backports
                vendor: Debian
                baseImage: debian:bullseye-backports
            allowedCombinations:
              - osRelease: 11
                architecture: amd64
        "#};

        let err = DistroSettings::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("matches 2 distros"));
    }

    #[test]
    fn test_repeated_combinations_collapse() -> Result<()> {
        let yaml = format!("{FOCAL}  - osRelease: '20.04'\n    architecture: amd64\n");
        let yaml = yaml.replace("matrixExtra: kept\n", "");
        let settings = DistroSettings::from_yaml(&yaml)?;

        assert_eq!(settings.allowed_combinations.len(), 3);
        assert_eq!(settings.unique_combinations().len(), 2);
        assert_eq!(settings.combinations().len(), 2);

        Ok(())
    }

    #[test]
    fn test_templates_use_defaults() -> Result<()> {
        let settings = DistroSettings::from_yaml(FOCAL)?;
        let armed = settings.arm("focal", "amd64")?;

        assert_eq!(settings.image_name(&armed), "mkfoo-ubuntu-builder");
        assert_eq!(settings.image_tag(&armed), "20.04_amd64");
        assert_eq!(settings.label_prefix(), "io.machinekit.mkfoo");
        assert_eq!(settings.image_hash_label(), "io.machinekit.mkfoo.image_hash");
        assert_eq!(settings.debian_dir(), PathBuf::from("debian"));
        assert_eq!(settings.cloudsmith_repo_slug(), "mkfoo");
        assert!(settings.configure_source_cmd().is_none());

        Ok(())
    }

    #[test]
    fn test_templates_from_settings() -> Result<()> {
        let yaml = format!(
            "{FOCAL}imageNameFmt: ci-@PACKAGE@\nimageTagFmt: '@CODENAME@-@ARCHITECTURE@'\nlabel_prefix: org.example\n"
        );
        let settings = DistroSettings::from_yaml(&yaml)?;
        let armed = settings.arm("buster", "armhf")?;

        assert_eq!(settings.image_name(&armed), "ci-mkfoo");
        assert_eq!(settings.image_tag(&armed), "buster-armhf");
        assert_eq!(settings.image_hash_label(), "org.example.image_hash");

        Ok(())
    }

    #[test]
    fn test_unknown_keys_are_kept() -> Result<()> {
        let settings = DistroSettings::from_yaml(FOCAL)?;

        assert_eq!(
            settings.extra.get("matrixExtra"),
            Some(&serde_yaml::Value::String("kept".into()))
        );
        assert_eq!(settings.combinations().len(), 2);

        Ok(())
    }
}
