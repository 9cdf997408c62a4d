//! Package repositories
//!
//! A repository serves archives and build descriptors in the Maven layout
//! `<group as path>/<artifact>/<version>/<artifact>-<version>.jar`, with an
//! optional `.toml` descriptor sidecar and an optional `.jar.sha256` checksum.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ResolverConfig;
use crate::module::registry::manifest::BuildDescriptor;
use crate::module::traits::{Coordinate, ModuleError};

/// Source of module archives and their declared dependencies
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// Human-readable location, for logs
    fn name(&self) -> &str;

    /// Fetch the archive bytes for a coordinate
    async fn fetch_archive(&self, coordinate: &Coordinate) -> Result<Bytes, ModuleError>;

    /// Fetch the published build descriptor, if the repository has one
    async fn fetch_descriptor(
        &self,
        coordinate: &Coordinate,
    ) -> Result<Option<BuildDescriptor>, ModuleError>;
}

/// Verify archive bytes against the contents of a `.sha256` sidecar
///
/// The sidecar holds a hex digest, optionally followed by a file name.
pub fn verify_checksum(
    coordinate: &Coordinate,
    bytes: &[u8],
    sidecar: &str,
) -> Result<(), ModuleError> {
    let expected = sidecar
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = hex::encode(Sha256::digest(bytes));
    if expected != actual {
        return Err(ModuleError::ChecksumMismatch(format!(
            "{} (expected {}, got {})",
            coordinate, expected, actual
        )));
    }
    Ok(())
}

/// Repository on the local filesystem
pub struct DirectoryRepository {
    root: PathBuf,
    name: String,
}

impl DirectoryRepository {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            name: root.display().to_string(),
            root,
        }
    }
}

fn checksum_path(archive: &Path) -> PathBuf {
    let mut path = archive.as_os_str().to_owned();
    path.push(".sha256");
    PathBuf::from(path)
}

#[async_trait]
impl PackageRepository for DirectoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_archive(&self, coordinate: &Coordinate) -> Result<Bytes, ModuleError> {
        let path = self.root.join(coordinate.archive_path());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModuleError::ArtifactNotFound(format!(
                    "{} in {}",
                    coordinate, self.name
                )));
            }
            Err(e) => return Err(e.into()),
        };

        match tokio::fs::read_to_string(checksum_path(&path)).await {
            Ok(sidecar) => verify_checksum(coordinate, &bytes, &sidecar)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Bytes::from(bytes))
    }

    async fn fetch_descriptor(
        &self,
        coordinate: &Coordinate,
    ) -> Result<Option<BuildDescriptor>, ModuleError> {
        let path = self.root.join(coordinate.descriptor_path());
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => BuildDescriptor::parse(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(feature = "http-repository")]
pub use http::HttpRepository;

#[cfg(feature = "http-repository")]
mod http {
    use super::*;
    use crate::utils::retry::{retry_async_with_backoff, RetryConfig};
    use reqwest::{Client, StatusCode};
    use std::time::Duration;

    /// Remote repository reached over HTTP(S)
    pub struct HttpRepository {
        client: Client,
        base_url: String,
        retry: RetryConfig,
    }

    impl HttpRepository {
        pub fn new(base_url: &str, config: &ResolverConfig) -> Self {
            let client = Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new());
            Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                retry: RetryConfig::network(config.max_attempts),
            }
        }

        fn url(&self, coordinate: &Coordinate, suffix: &str) -> String {
            format!(
                "{}/{}/{}/{}/{}{}",
                self.base_url,
                coordinate.group.replace('.', "/"),
                coordinate.artifact,
                coordinate.version,
                coordinate.file_stem(),
                suffix
            )
        }

        /// GET with retries; 404 is a definite answer and is not retried
        async fn get_optional(&self, url: &str) -> Result<Option<Bytes>, ModuleError> {
            let client = &self.client;
            retry_async_with_backoff(&self.retry, || async move {
                let response = client.get(url).send().await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                let response = response.error_for_status()?;
                Ok::<_, ModuleError>(Some(response.bytes().await?))
            })
            .await
        }
    }

    #[async_trait]
    impl PackageRepository for HttpRepository {
        fn name(&self) -> &str {
            &self.base_url
        }

        async fn fetch_archive(&self, coordinate: &Coordinate) -> Result<Bytes, ModuleError> {
            let url = self.url(coordinate, ".jar");
            debug!("Fetching {}", url);
            let bytes = self.get_optional(&url).await?.ok_or_else(|| {
                ModuleError::ArtifactNotFound(format!("{} at {}", coordinate, self.base_url))
            })?;

            if let Some(sidecar) = self.get_optional(&format!("{}.sha256", url)).await? {
                verify_checksum(coordinate, &bytes, &String::from_utf8_lossy(&sidecar))?;
            }
            Ok(bytes)
        }

        async fn fetch_descriptor(
            &self,
            coordinate: &Coordinate,
        ) -> Result<Option<BuildDescriptor>, ModuleError> {
            match self.get_optional(&self.url(coordinate, ".toml")).await? {
                Some(body) => BuildDescriptor::parse(&String::from_utf8_lossy(&body)).map(Some),
                None => Ok(None),
            }
        }
    }
}

/// Build a repository from a configured location
///
/// `http://` and `https://` locations are remote; anything else (optionally
/// prefixed with `file://`) is a local directory.
pub fn repository_from_location(
    location: &str,
    config: &ResolverConfig,
) -> Result<Box<dyn PackageRepository>, ModuleError> {
    let location = location.trim();
    if location.starts_with("http://") || location.starts_with("https://") {
        #[cfg(feature = "http-repository")]
        {
            return Ok(Box::new(HttpRepository::new(location, config)));
        }
        #[cfg(not(feature = "http-repository"))]
        {
            let _ = config;
            return Err(ModuleError::RepositoryError(format!(
                "{} requires the http-repository feature",
                location
            )));
        }
    }
    let _ = config;
    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Box::new(DirectoryRepository::new(path)))
}
