pub mod api;

use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_ecr::types::{ImageDetail, TagStatus};
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::api::{EcrApi, SdkEcrApi};
use crate::credentials::{CredentialProvider, EcrCredentialProvider};
use crate::endpoints::fips_endpoint_for;
use crate::models::{Auth, EcrConfig};

/// Ceiling on image-listing pages per repository when repositories were
/// discovered rather than named explicitly. Past this, the caller is told
/// to narrow the query instead of scanning the whole registry.
const MAX_IMAGE_PAGES: usize = 50;

/// Thin client facade over AWS ECR
///
/// Exposes authorization tokens, repository creation and existence probing,
/// and paginated image listings with a caller-supplied callback per page.
/// All real work is delegated to the SDK client and the credential provider;
/// this type holds no state beyond those two delegates.
pub struct EcrClient {
    api: Arc<dyn EcrApi>,
    credentials: Arc<dyn CredentialProvider>,
}

impl EcrClient {
    /// Create a new ECR client for the configured region
    pub async fn new(config: EcrConfig) -> Result<Self> {
        let sdk_config = build_aws_config(&config).await;
        let client = aws_sdk_ecr::Client::new(&sdk_config);
        let credentials = EcrCredentialProvider::new(client.clone(), config.cache_dir.clone());

        Ok(Self::from_parts(
            Arc::new(SdkEcrApi::new(client)),
            Arc::new(credentials),
        ))
    }

    /// Create a new ECR client that communicates with a FIPS endpoint
    ///
    /// Resolves the FIPS endpoint for the configured region first; failure to
    /// resolve is fatal. Both the registry API and the credential provider
    /// share the resolved endpoint so they present one endpoint
    /// configuration.
    pub async fn new_fips(config: EcrConfig) -> Result<Self> {
        let endpoint = fips_endpoint_for(&config.region)?;
        debug!("Using FIPS endpoint: {}", endpoint);

        let sdk_config = build_aws_config(&config).await;
        let ecr_config = aws_sdk_ecr::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint)
            .build();
        let client = aws_sdk_ecr::Client::from_conf(ecr_config);
        let credentials = EcrCredentialProvider::new(client.clone(), config.cache_dir.clone());

        Ok(Self::from_parts(
            Arc::new(SdkEcrApi::new(client)),
            Arc::new(credentials),
        ))
    }

    /// Assemble a client from explicit delegates
    ///
    /// Useful for substituting mock delegates in tests or custom credential
    /// providers.
    pub fn from_parts(api: Arc<dyn EcrApi>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { api, credentials }
    }

    /// Get an authorization token for the registry behind the given endpoint URI
    pub async fn get_authorization_token(&self, registry_uri: &str) -> Result<Auth> {
        let auth = self
            .credentials
            .get_credentials(registry_uri)
            .await
            .context("failed to get authorization token")?;
        Ok(Auth::from_registry_auth(auth))
    }

    /// Get an authorization token for the registry with the given registry ID
    pub async fn get_authorization_token_by_id(&self, registry_id: &str) -> Result<Auth> {
        let auth = self
            .credentials
            .get_credentials_by_registry_id(registry_id)
            .await
            .context("failed to get authorization token")?;
        Ok(Auth::from_registry_auth(auth))
    }

    /// Check whether a repository exists
    ///
    /// Existence probe, not a diagnostic query: any failure (not-found,
    /// auth, network) yields `false`.
    pub async fn repository_exists(&self, repository_name: &str) -> bool {
        debug!(repository = repository_name, "Check if repository exists");
        self.api
            .describe_repositories(&[repository_name.to_string()], None, None)
            .await
            .is_ok()
    }

    /// Create a repository, returning the name confirmed by the service
    pub async fn create_repository(&self, repository_name: &str) -> Result<String> {
        info!(repository = repository_name, "Creating repository");

        let response = self.api.create_repository(repository_name).await?;
        let created = response
            .repository()
            .and_then(|r| r.repository_name())
            .context("create repository response is empty")?
            .to_string();

        info!("Repository created");
        Ok(created)
    }

    /// Walk image listings, invoking `process` once per page of image details
    ///
    /// With `repository_names` non-empty, exactly those repositories are
    /// walked and no discovery calls are made. Otherwise all repositories for
    /// `registry_id` (or the default registry) are discovered page by page,
    /// and each discovered repository's image listing is capped at
    /// [`MAX_IMAGE_PAGES`] pages. The walk is sequential and stops at the
    /// first failure; a callback error aborts immediately with no further
    /// page fetches.
    pub async fn get_images<F>(
        &self,
        repository_names: &[String],
        tag_status: Option<TagStatus>,
        registry_id: Option<&str>,
        mut process: F,
    ) -> Result<()>
    where
        F: FnMut(&[ImageDetail]) -> Result<()>,
    {
        debug!("Getting images from ECR...");

        // Skip repository discovery when names are given explicitly
        if !repository_names.is_empty() {
            for repository in repository_names {
                self.walk_image_pages(repository, tag_status.clone(), registry_id, &mut process, None)
                    .await?;
            }
            return Ok(());
        }

        let mut next_token: Option<String> = None;
        loop {
            let response = self
                .api
                .describe_repositories(&[], registry_id, next_token)
                .await?;

            let batch: Vec<String> = response
                .repositories()
                .iter()
                .filter_map(|r| r.repository_name().map(String::from))
                .collect();

            for repository in &batch {
                self.walk_image_pages(
                    repository,
                    tag_status.clone(),
                    registry_id,
                    &mut process,
                    Some(MAX_IMAGE_PAGES),
                )
                .await?;
            }

            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                return Ok(());
            }
        }
    }

    /// Paginate one repository's image listing
    ///
    /// The page counter is an explicit accumulator local to this walk. With a
    /// `page_cap`, the callback still runs for every page up to the cap, and
    /// the walk fails only if more pages remain beyond it.
    async fn walk_image_pages<F>(
        &self,
        repository_name: &str,
        tag_status: Option<TagStatus>,
        registry_id: Option<&str>,
        process: &mut F,
        page_cap: Option<usize>,
    ) -> Result<()>
    where
        F: FnMut(&[ImageDetail]) -> Result<()>,
    {
        let mut next_token: Option<String> = None;
        let mut pages_seen = 0usize;

        loop {
            let response = self
                .api
                .describe_images(repository_name, tag_status.clone(), registry_id, next_token)
                .await?;

            pages_seen += 1;
            process(response.image_details())?;

            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                return Ok(());
            }
            if let Some(cap) = page_cap {
                if pages_seen >= cap {
                    bail!(
                        "image listing for repository '{}' exceeds {} pages; \
                         please specify repository names to narrow the query",
                        repository_name,
                        cap
                    );
                }
            }
        }
    }
}

/// Build the AWS config: static credentials when provided, else the default
/// credential chain (IAM role, env vars, etc.)
async fn build_aws_config(config: &EcrConfig) -> aws_config::SdkConfig {
    if let (Some(access_key), Some(secret_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        let creds =
            aws_sdk_ecr::config::Credentials::new(access_key, secret_key, None, None, "static");
        aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(creds)
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await
    } else {
        aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegistryAuth;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use aws_sdk_ecr::operation::create_repository::CreateRepositoryOutput;
    use aws_sdk_ecr::operation::describe_images::DescribeImagesOutput;
    use aws_sdk_ecr::operation::describe_repositories::DescribeRepositoriesOutput;
    use aws_sdk_ecr::types::Repository;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn image(digest: &str) -> ImageDetail {
        ImageDetail::builder().image_digest(digest).build()
    }

    fn page_index(next_token: &Option<String>) -> usize {
        next_token
            .as_deref()
            .map(|t| t.parse().unwrap())
            .unwrap_or(0)
    }

    fn token_for(next_page: usize, total_pages: usize) -> Option<String> {
        (next_page < total_pages).then(|| next_page.to_string())
    }

    /// Scripted ECR delegate: repository discovery pages, per-repository
    /// image pages, and call counters.
    #[derive(Default)]
    struct MockEcrApi {
        repository_pages: Vec<Vec<String>>,
        image_pages: HashMap<String, Vec<Vec<ImageDetail>>>,
        /// When set, describe_images returns an endless stream of pages
        endless_images: bool,
        fail_describe_repositories: bool,
        created_repository: Option<String>,
        discovery_calls: AtomicUsize,
        image_calls: AtomicUsize,
    }

    #[async_trait]
    impl EcrApi for MockEcrApi {
        async fn describe_repositories(
            &self,
            repository_names: &[String],
            _registry_id: Option<&str>,
            next_token: Option<String>,
        ) -> Result<DescribeRepositoriesOutput> {
            if self.fail_describe_repositories {
                return Err(anyhow!("service unavailable"));
            }

            // Existence probe path: describe specific names
            if !repository_names.is_empty() {
                let mut builder = DescribeRepositoriesOutput::builder();
                for name in repository_names {
                    builder =
                        builder.repositories(Repository::builder().repository_name(name).build());
                }
                return Ok(builder.build());
            }

            // Discovery path: one scripted page per call
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            let page = page_index(&next_token);
            let mut builder = DescribeRepositoriesOutput::builder();
            for name in &self.repository_pages[page] {
                builder = builder.repositories(Repository::builder().repository_name(name).build());
            }
            if let Some(token) = token_for(page + 1, self.repository_pages.len()) {
                builder = builder.next_token(token);
            }
            Ok(builder.build())
        }

        async fn create_repository(
            &self,
            _repository_name: &str,
        ) -> Result<CreateRepositoryOutput> {
            let mut builder = CreateRepositoryOutput::builder();
            if let Some(name) = &self.created_repository {
                builder =
                    builder.repository(Repository::builder().repository_name(name).build());
            }
            Ok(builder.build())
        }

        async fn describe_images(
            &self,
            repository_name: &str,
            _tag_status: Option<TagStatus>,
            _registry_id: Option<&str>,
            next_token: Option<String>,
        ) -> Result<DescribeImagesOutput> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            let page = page_index(&next_token);

            if self.endless_images {
                return Ok(DescribeImagesOutput::builder()
                    .image_details(image(&format!("sha256:{}", page)))
                    .next_token((page + 1).to_string())
                    .build());
            }

            let pages = self
                .image_pages
                .get(repository_name)
                .ok_or_else(|| anyhow!("repository '{}' not found", repository_name))?;
            let mut builder = DescribeImagesOutput::builder();
            for detail in &pages[page] {
                builder = builder.image_details(detail.clone());
            }
            if let Some(token) = token_for(page + 1, pages.len()) {
                builder = builder.next_token(token);
            }
            Ok(builder.build())
        }
    }

    struct MockCredentialProvider {
        proxy_endpoint: String,
        fail: bool,
    }

    #[async_trait]
    impl CredentialProvider for MockCredentialProvider {
        async fn get_credentials(&self, _registry_uri: &str) -> Result<RegistryAuth> {
            if self.fail {
                return Err(anyhow!("token exchange failed"));
            }
            Ok(RegistryAuth {
                username: "AWS".to_string(),
                password: "secret".to_string(),
                proxy_endpoint: self.proxy_endpoint.clone(),
                expires_at: None,
            })
        }

        async fn get_credentials_by_registry_id(&self, registry_id: &str) -> Result<RegistryAuth> {
            self.get_credentials(registry_id).await
        }
    }

    fn client_with_api(api: MockEcrApi) -> (EcrClient, Arc<MockEcrApi>) {
        let api = Arc::new(api);
        let credentials = Arc::new(MockCredentialProvider {
            proxy_endpoint: "https://123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string(),
            fail: false,
        });
        (
            EcrClient::from_parts(api.clone(), credentials),
            api,
        )
    }

    #[tokio::test]
    async fn test_get_authorization_token_derives_registry() {
        let (client, _api) = client_with_api(MockEcrApi::default());

        let auth = client
            .get_authorization_token("123456789012.dkr.ecr.us-east-1.amazonaws.com")
            .await
            .unwrap();
        assert_eq!(auth.registry, "123456789012.dkr.ecr.us-east-1.amazonaws.com");
        assert_eq!(auth.username, "AWS");
        assert_eq!(auth.password, "secret");

        let auth = client.get_authorization_token_by_id("123456789012").await.unwrap();
        assert_eq!(auth.registry, "123456789012.dkr.ecr.us-east-1.amazonaws.com");
    }

    #[tokio::test]
    async fn test_get_authorization_token_wraps_delegate_failure() {
        let api = Arc::new(MockEcrApi::default());
        let credentials = Arc::new(MockCredentialProvider {
            proxy_endpoint: String::new(),
            fail: true,
        });
        let client = EcrClient::from_parts(api, credentials);

        let err = client.get_authorization_token("anything").await.unwrap_err();
        assert!(err.to_string().contains("failed to get authorization token"));
    }

    #[tokio::test]
    async fn test_repository_exists() {
        let (client, _api) = client_with_api(MockEcrApi::default());
        assert!(client.repository_exists("present").await);
    }

    #[tokio::test]
    async fn test_repository_exists_swallows_errors() {
        let (client, _api) = client_with_api(MockEcrApi {
            fail_describe_repositories: true,
            ..Default::default()
        });
        assert!(!client.repository_exists("anything").await);
    }

    #[tokio::test]
    async fn test_create_repository_returns_confirmed_name() {
        let (client, _api) = client_with_api(MockEcrApi {
            created_repository: Some("confirmed-name".to_string()),
            ..Default::default()
        });

        let created = client.create_repository("requested-name").await.unwrap();
        assert_eq!(created, "confirmed-name");
    }

    #[tokio::test]
    async fn test_create_repository_rejects_empty_response() {
        let (client, _api) = client_with_api(MockEcrApi::default());

        let err = client.create_repository("repo").await.unwrap_err();
        assert!(err.to_string().contains("create repository response is empty"));
    }

    #[tokio::test]
    async fn test_explicit_names_skip_discovery() {
        let (client, api) = client_with_api(MockEcrApi {
            image_pages: HashMap::from([("a".to_string(), vec![vec![image("sha256:1")]])]),
            ..Default::default()
        });

        let mut pages = 0;
        client
            .get_images(&["a".to_string()], None, None, |_| {
                pages += 1;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(pages, 1);
        assert_eq!(api.discovery_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_discovered_walk_visits_each_repository_page() {
        let (client, api) = client_with_api(MockEcrApi {
            repository_pages: vec![vec!["a".to_string()], vec!["b".to_string()]],
            image_pages: HashMap::from([
                (
                    "a".to_string(),
                    vec![vec![image("sha256:a1"), image("sha256:a2")]],
                ),
                (
                    "b".to_string(),
                    vec![vec![image("sha256:b1"), image("sha256:b2")]],
                ),
            ]),
            ..Default::default()
        });

        let mut seen = Vec::new();
        client
            .get_images(&[], None, None, |images| {
                seen.push(images.len());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![2, 2]);
        assert_eq!(api.discovery_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unbounded_listing_trips_page_guard() {
        let (client, _api) = client_with_api(MockEcrApi {
            repository_pages: vec![vec!["huge".to_string()]],
            endless_images: true,
            ..Default::default()
        });

        let mut pages = 0;
        let err = client
            .get_images(&[], None, None, |_| {
                pages += 1;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(pages, 50);
        assert!(err.to_string().contains("specify repository names"));
    }

    #[tokio::test]
    async fn test_explicit_names_are_not_page_capped() {
        let sixty_pages: Vec<Vec<ImageDetail>> =
            (0..60).map(|i| vec![image(&format!("sha256:{}", i))]).collect();
        let (client, _api) = client_with_api(MockEcrApi {
            image_pages: HashMap::from([("huge".to_string(), sixty_pages)]),
            ..Default::default()
        });

        let mut pages = 0;
        client
            .get_images(&["huge".to_string()], None, None, |_| {
                pages += 1;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(pages, 60);
    }

    #[tokio::test]
    async fn test_callback_error_stops_pagination() {
        let five_pages: Vec<Vec<ImageDetail>> =
            (0..5).map(|i| vec![image(&format!("sha256:{}", i))]).collect();
        let (client, api) = client_with_api(MockEcrApi {
            image_pages: HashMap::from([("repo".to_string(), five_pages)]),
            ..Default::default()
        });

        let mut pages = 0;
        let err = client
            .get_images(&["repo".to_string()], None, None, |_| {
                pages += 1;
                if pages == 2 {
                    return Err(anyhow!("caller gave up"));
                }
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(pages, 2);
        assert_eq!(api.image_calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("caller gave up"));
    }

    #[tokio::test]
    async fn test_walk_stops_at_first_failing_repository() {
        // "b" has no scripted pages, so its first fetch fails; "c" must
        // never be reached.
        let (client, api) = client_with_api(MockEcrApi {
            repository_pages: vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]],
            image_pages: HashMap::from([
                ("a".to_string(), vec![vec![image("sha256:a")]]),
                ("c".to_string(), vec![vec![image("sha256:c")]]),
            ]),
            ..Default::default()
        });

        let mut pages = 0;
        let err = client
            .get_images(&[], None, None, |_| {
                pages += 1;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(pages, 1);
        assert_eq!(api.image_calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("'b' not found"));
    }

    #[tokio::test]
    async fn test_discovery_failure_propagates() {
        let (client, _api) = client_with_api(MockEcrApi {
            fail_describe_repositories: true,
            ..Default::default()
        });

        let err = client
            .get_images(&[], None, None, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("service unavailable"));
    }
}
