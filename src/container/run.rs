use eyre::Result;
use nix::unistd::{getgid, getuid};
use tracing::*;

use crate::process::Cmd;
use crate::project::Project;
use crate::util::config::ArmedCombination;

/// `docker run` of a builder image with the repository's parent directory
/// mounted at the same path.
pub struct ContainerRun<'a> {
    project: &'a Project,
    armed: ArmedCombination,
    tty: bool,
    env: Vec<String>,
    volumes: Vec<String>,
    docker_args: Vec<String>,
}

impl<'a> ContainerRun<'a> {
    pub fn new(project: &'a Project, version: &str, architecture: &str) -> Result<Self> {
        Ok(Self {
            armed: project.arm(version, architecture)?,
            project,
            tty: false,
            env: vec![],
            volumes: vec![],
            docker_args: vec![],
        })
    }

    /// Attach a terminal (`--tty --interactive`).
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn volumes(mut self, volumes: Vec<String>) -> Self {
        self.volumes = volumes;
        self
    }

    /// Replace the default `docker run` options.
    pub fn docker_args(mut self, docker_args: Vec<String>) -> Self {
        self.docker_args = docker_args;
        self
    }

    fn default_docker_args(&self) -> Vec<String> {
        let mut args = vec![];
        if self.tty {
            args.push("--tty".to_string());
            args.push("--interactive".to_string());
        }
        let parent = self.project.parent_dir();
        args.extend([
            "--rm".to_string(),
            format!("--user={}:{}", getuid(), getgid()),
            format!("--volume={0}:{0}", parent.display()),
            format!("--workdir={}", self.project.root().display()),
            format!("--hostname={}_{}", self.armed.codename, self.armed.architecture),
        ]);
        args
    }

    /// Everything after `docker run`.
    pub fn run_args(&self, command: &[String]) -> Result<Vec<String>> {
        let mut args = if self.docker_args.is_empty() {
            self.default_docker_args()
        } else {
            self.docker_args.clone()
        };
        args.extend(self.env.iter().map(|e| format!("--env={e}")));
        args.extend(self.volumes.iter().map(|v| format!("--volume={v}:{v}")));
        args.push(self.project.image_registry_name_tag(&self.armed)?);
        args.extend(command.iter().cloned());
        Ok(args)
    }

    pub async fn run(&self, command: &[String]) -> Result<()> {
        let cmd = self.command(command)?;
        info!("running: {cmd}");
        self.project.runner().status(&cmd).await?;
        Ok(())
    }

    fn command(&self, command: &[String]) -> Result<Cmd> {
        Ok(self
            .project
            .cmd("docker")
            .arg("run")
            .args(self.run_args(command)?))
    }
}
