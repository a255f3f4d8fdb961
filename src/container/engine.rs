use bollard::auth::DockerCredentials;
use bollard::image::{CreateImageOptions, PushImageOptions};
use bollard::Docker;
use eyre::{eyre, Result};
use futures_util::StreamExt;
use tracing::*;

use crate::project::Project;

/// The local Docker daemon, for moving images to and from the registry.
pub struct Engine {
    docker: Docker,
}

impl Engine {
    pub fn connect() -> Result<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    pub async fn push(&self, reference: &str, credentials: Option<DockerCredentials>) -> Result<()> {
        let (image, tag) = split_image_reference(reference);

        info!("pushing {reference}...");
        let mut push = Box::pin(self.docker.push_image(
            image,
            Some(PushImageOptions { tag }),
            credentials,
        ));
        while let Some(info) = push.next().await {
            let info = info?;
            if let Some(error) = info.error {
                return Err(eyre!("pushing {reference} failed: {error}"));
            }
            if let Some(status) = info.status {
                debug!("docker push: {status} {}", info.progress.unwrap_or_default());
            }
        }

        Ok(())
    }

    pub async fn pull(&self, reference: &str, credentials: Option<DockerCredentials>) -> Result<()> {
        let (image, tag) = split_image_reference(reference);

        info!("pulling {reference}...");
        let mut pull = Box::pin(self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                tag,
                ..Default::default()
            }),
            None,
            credentials,
        ));
        while let Some(info) = pull.next().await {
            let info = info?;
            if let Some(status) = info.status {
                debug!("docker pull: {status} {}", info.progress.unwrap_or_default());
            }
        }

        Ok(())
    }
}

/// Split `host/ns/name:tag` into `host/ns/name` and `tag`. A colon before
/// the last `/` belongs to a registry port, not a tag.
pub fn split_image_reference(reference: &str) -> (&str, &str) {
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => (
            &reference[..name_start + i],
            &reference[name_start + i + 1..],
        ),
        None => (reference, "latest"),
    }
}

/// Registry credentials from `$DOCKER_REGISTRY_USER` and
/// `$DOCKER_REGISTRY_PASSWORD`, if both are set.
pub fn credentials(project: &Project) -> Option<DockerCredentials> {
    let env = project.env();
    let username = env.lookup("DOCKER_REGISTRY_USER")?;
    let password = env.lookup("DOCKER_REGISTRY_PASSWORD")?;
    let serveraddress = project.registry_host().ok();

    Some(DockerCredentials {
        username: Some(username),
        password: Some(password),
        serveraddress,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use crate::process::testing::RecordingRunner;
    use crate::project::testing::{project, project_with, SETTINGS};
    use crate::util::env::Environment;

    use super::*;

    #[ctor::ctor]
    fn init() {
        crate::util::test_init();
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(
            split_image_reference("ghcr.io/machinekit/ci/hal-debian-builder:10_amd64"),
            ("ghcr.io/machinekit/ci/hal-debian-builder", "10_amd64")
        );
        assert_eq!(
            split_image_reference("localhost:5000/hal:10_armhf"),
            ("localhost:5000/hal", "10_armhf")
        );
        assert_eq!(
            split_image_reference("localhost:5000/hal"),
            ("localhost:5000/hal", "latest")
        );
        assert_eq!(split_image_reference("debian"), ("debian", "latest"));
    }

    #[test]
    fn test_credentials_need_user_and_password() {
        let anonymous = project(Path::new("/src/hal"), Arc::new(RecordingRunner::new()));
        assert!(credentials(&anonymous).is_none());

        let authed = project_with(
            Path::new("/src/hal"),
            SETTINGS,
            Environment::isolated([
                ("DOCKER_REGISTRY_URL", "https://ghcr.io"),
                ("DOCKER_REGISTRY_USER", "machinekit"),
                ("DOCKER_REGISTRY_PASSWORD", "hunter2"),
            ]),
            Arc::new(RecordingRunner::new()),
        );

        let creds = credentials(&authed).unwrap();
        assert_eq!(creds.username.as_deref(), Some("machinekit"));
        assert_eq!(creds.password.as_deref(), Some("hunter2"));
        assert_eq!(creds.serveraddress.as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_credentials_keep_registry_port() {
        let project = project_with(
            Path::new("/src/hal"),
            SETTINGS,
            Environment::isolated([
                ("DOCKER_REGISTRY_URL", "http://localhost:5000"),
                ("DOCKER_REGISTRY_USER", "machinekit"),
                ("DOCKER_REGISTRY_PASSWORD", "hunter2"),
            ]),
            Arc::new(RecordingRunner::new()),
        );

        let creds = credentials(&project).unwrap();
        assert_eq!(creds.serveraddress.as_deref(), Some("localhost:5000"));
        assert_eq!(
            split_image_reference("localhost:5000/machinekit/ci/hal:10_amd64"),
            ("localhost:5000/machinekit/ci/hal", "10_amd64")
        );
    }
}
