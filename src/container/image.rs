use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use eyre::Result;
use tracing::*;

use crate::project::Project;
use crate::util::config::ArmedCombination;

use super::context::BuildContext;
use super::engine::{credentials, Engine};
use super::registry::RegistryClient;

/// Commit metadata recorded in image labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub remote_url: String,
}

impl GitInfo {
    pub async fn read(project: &Project) -> Result<Self> {
        let git = |args: &[&str]| project.cmd("git").args(args.iter().copied());
        let runner = project.runner();

        Ok(Self {
            sha: runner.read(&git(&["rev-parse", "HEAD"])).await?,
            author_name: runner.read(&git(&["show", "-s", "--pretty=%an", "HEAD"])).await?,
            author_email: runner.read(&git(&["show", "-s", "--format=%ae", "HEAD"])).await?,
            remote_url: runner.read(&git(&["ls-remote", "--get-url"])).await?,
        })
    }
}

/// How the registry's copy of the image relates to the local build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedImage {
    Missing,
    Unlabelled,
    Matching(String),
    Mismatched { registry: String, local: String },
}

/// A builder image for one armed distro/architecture combination.
pub struct ContainerImage<'a> {
    project: &'a Project,
    armed: ArmedCombination,
    dockerfile: Option<PathBuf>,
    entrypoint: Option<PathBuf>,
}

impl<'a> ContainerImage<'a> {
    pub fn new(project: &'a Project, version: &str, architecture: &str) -> Result<Self> {
        Ok(Self {
            armed: project.arm(version, architecture)?,
            project,
            dockerfile: None,
            entrypoint: None,
        })
    }

    pub fn dockerfile(mut self, dockerfile: Option<PathBuf>) -> Self {
        self.dockerfile = dockerfile;
        self
    }

    pub fn entrypoint(mut self, entrypoint: Option<PathBuf>) -> Self {
        self.entrypoint = entrypoint;
        self
    }

    pub fn armed(&self) -> &ArmedCombination {
        &self.armed
    }

    pub fn reference(&self) -> Result<String> {
        self.project.image_registry_name_tag(&self.armed)
    }

    pub async fn context(&self) -> Result<BuildContext> {
        BuildContext::assemble(
            self.project,
            self.dockerfile.as_deref(),
            self.entrypoint.as_deref(),
        )
        .await
    }

    pub async fn local_hash(&self) -> Result<String> {
        self.context().await?.hash().await
    }

    /// Everything after `docker build` except the context directory.
    pub fn build_args(
        &self,
        git: &GitInfo,
        image_hash: &str,
        target: Option<&str>,
        build_date: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let settings = self.project.settings();
        let armed = &self.armed;
        let prefix = settings.label_prefix();

        let mut build_args = vec![
            ("DEBIAN_DISTRO_BASE", armed.base_image.clone()),
            ("HOST_ARCHITECTURE", armed.architecture.clone()),
            ("DEBIAN_DIR", settings.debian_dir().to_string_lossy().to_string()),
            ("ENTRYPOINT", "entrypoint".to_string()),
        ];
        if let Some(cmd) = settings.script_pre_cmd() {
            build_args.push(("SCRIPT_PRE_CMD", cmd.to_string()));
        }
        if let Some(cmd) = settings.script_post_cmd() {
            build_args.push(("SCRIPT_POST_CMD", cmd.to_string()));
        }

        let labels = [
            ("maintainer_name", git.author_name.clone()),
            ("maintainer_email", git.author_email.clone()),
            ("project", settings.project_name.clone()),
            ("os_vendor", capitalize(&armed.vendor)),
            ("os_codename", armed.codename.clone()),
            ("host_architecture", armed.architecture.clone()),
            ("build-date", build_date.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("vcs-ref", git.sha.clone()),
            ("vcs-url", git.remote_url.clone()),
        ];

        let tag = match target {
            Some(target) => format!("{}-{target}", self.reference()?),
            None => self.reference()?,
        };

        let mut args: Vec<String> = build_args
            .into_iter()
            .map(|(name, value)| format!("--build-arg={name}={value}"))
            .chain(
                labels
                    .into_iter()
                    .map(|(name, value)| format!("--label={prefix}.{name}={value}")),
            )
            .collect();
        args.push(format!("--label={}={image_hash}", settings.image_hash_label()));
        args.push("--file=Dockerfile".into());
        args.push(format!("--tag={tag}"));
        args.push("--progress=plain".into());
        if let Some(target) = target {
            args.push(format!("--target={target}"));
        }

        Ok(args)
    }

    pub async fn build(&self, target: Option<&str>, dry_run: bool) -> Result<()> {
        let git = GitInfo::read(self.project).await?;
        let context = self.context().await?;
        let image_hash = context.hash().await?;
        let context_dir = context.path();

        let args = self.build_args(&git, &image_hash, target, Utc::now())?;
        let cmd = self
            .project
            .cmd("docker")
            .arg("build")
            .args(args)
            .arg(context_dir.to_string_lossy())
            .cwd(&context_dir);

        info!(
            "building image, {} {} {}, hash {image_hash}; command:\n    {cmd}",
            self.armed.vendor, self.armed.codename, self.armed.architecture
        );
        info!(
            "docker context, {}:\n{}",
            context_dir.display(),
            context.listing().await?.join("\n")
        );

        if dry_run {
            self.project.runner().show(&cmd);
            return Ok(());
        }
        self.project.runner().status(&cmd).await?;

        Ok(())
    }

    pub async fn push(&self, dry_run: bool) -> Result<()> {
        let reference = self.reference()?;
        info!("command: docker push {reference}");
        if dry_run {
            self.project
                .runner()
                .show(&self.project.cmd("docker").args(["push", reference.as_str()]));
            return Ok(());
        }
        Engine::connect()?
            .push(&reference, credentials(self.project))
            .await
    }

    pub async fn registry_labels(&self) -> Result<Option<BTreeMap<String, String>>> {
        let repository = self.project.registry_repository(&self.armed)?;
        let tag = self.project.settings().image_tag(&self.armed);
        RegistryClient::from_project(self.project)?
            .image_labels(&repository, &tag)
            .await
    }

    /// Compare the registry image's hash label to `local_hash`.
    pub fn compare(&self, labels: Option<&BTreeMap<String, String>>, local_hash: &str) -> CachedImage {
        let Some(labels) = labels else {
            return CachedImage::Missing;
        };
        match labels.get(&self.project.settings().image_hash_label()) {
            None => CachedImage::Unlabelled,
            Some(registry) if registry == local_hash => CachedImage::Matching(registry.clone()),
            Some(registry) => CachedImage::Mismatched {
                registry: registry.clone(),
                local: local_hash.to_string(),
            },
        }
    }

    pub async fn cached_image(&self) -> Result<CachedImage> {
        let labels = self.registry_labels().await?;
        let local_hash = self.local_hash().await?;
        Ok(self.compare(labels.as_ref(), &local_hash))
    }

    /// Print `<label> <value>` for each label of the registry image.
    pub async fn list_registry_labels(&self) -> Result<()> {
        match self.registry_labels().await? {
            Some(labels) => {
                for (label, value) in labels {
                    println!("{label} {value}");
                }
            }
            None => warn!("no cached image in registry"),
        }
        Ok(())
    }

    /// Pull the registry image if it was built from the same context as the
    /// local tree. Returns whether it was (or, in a dry run, would be)
    /// pulled.
    pub async fn pull(&self, dry_run: bool) -> Result<bool> {
        let hash_label = self.project.settings().image_hash_label();
        let image_hash = match self.cached_image().await? {
            CachedImage::Missing => {
                warn!("no cached image in registry");
                return Ok(false);
            }
            CachedImage::Unlabelled => {
                warn!("cached image in registry has no label '{hash_label}'");
                return Ok(false);
            }
            CachedImage::Mismatched { registry, local } => {
                warn!("local hash {local} != registry image hash {registry}");
                warn!("not pulling from registry");
                return Ok(false);
            }
            CachedImage::Matching(image_hash) => image_hash,
        };

        let reference = self.reference()?;
        info!(
            "pulling image, {} {} {}, hash {image_hash}; command:\n    docker pull {reference}",
            self.armed.vendor, self.armed.codename, self.armed.architecture
        );
        if dry_run {
            self.project
                .runner()
                .show(&self.project.cmd("docker").args(["pull", reference.as_str()]));
        } else {
            Engine::connect()?
                .pull(&reference, credentials(self.project))
                .await?;
        }

        Ok(true)
    }

    pub async fn show_hash(&self) -> Result<()> {
        println!("{}", self.local_hash().await?);
        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
