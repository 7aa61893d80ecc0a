use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_ecr::operation::create_repository::CreateRepositoryOutput;
use aws_sdk_ecr::operation::describe_images::DescribeImagesOutput;
use aws_sdk_ecr::operation::describe_repositories::DescribeRepositoriesOutput;
use aws_sdk_ecr::types::{DescribeImagesFilter, TagStatus};

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
pub(crate) fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    // Try to extract the message field from the debug output
    // Pattern: message: Some("actual error message")
    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    // Fallback: try to find just a Message field (as in JSON response)
    if let Some(start) = debug_str.find("\"Message\":\"") {
        let start = start + 11; // length of '"Message":"'
        if let Some(end) = debug_str[start..].find("\"") {
            return debug_str[start..start + end].to_string();
        }
    }

    // Last resort: return a truncated debug string
    if debug_str.len() > 200 {
        format!("{}...", &debug_str[..200])
    } else {
        debug_str
    }
}

/// Delegate seam over the ECR API calls the facade uses
///
/// Mirrors the three SDK operations one to one, returning the SDK output
/// types unmodified so the facade owns all interpretation. Tests substitute
/// a mock implementation; production code uses [`SdkEcrApi`].
#[async_trait]
pub trait EcrApi: Send + Sync {
    /// Describe repositories. With `repository_names` empty this lists the
    /// registry's repositories one page at a time via `next_token`; with
    /// names given it describes exactly those repositories.
    async fn describe_repositories(
        &self,
        repository_names: &[String],
        registry_id: Option<&str>,
        next_token: Option<String>,
    ) -> Result<DescribeRepositoriesOutput>;

    /// Create a repository with the given name.
    async fn create_repository(&self, repository_name: &str) -> Result<CreateRepositoryOutput>;

    /// Describe one page of images in a repository, optionally filtered by
    /// tag status and scoped to a registry.
    async fn describe_images(
        &self,
        repository_name: &str,
        tag_status: Option<TagStatus>,
        registry_id: Option<&str>,
        next_token: Option<String>,
    ) -> Result<DescribeImagesOutput>;
}

/// Production [`EcrApi`] implementation backed by the AWS SDK client
pub struct SdkEcrApi {
    client: aws_sdk_ecr::Client,
}

impl SdkEcrApi {
    pub fn new(client: aws_sdk_ecr::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EcrApi for SdkEcrApi {
    async fn describe_repositories(
        &self,
        repository_names: &[String],
        registry_id: Option<&str>,
        next_token: Option<String>,
    ) -> Result<DescribeRepositoriesOutput> {
        let mut request = self.client.describe_repositories();
        if !repository_names.is_empty() {
            request = request.set_repository_names(Some(repository_names.to_vec()));
        }
        if let Some(id) = registry_id {
            request = request.registry_id(id);
        }
        if let Some(token) = next_token {
            request = request.next_token(token);
        }

        request
            .send()
            .await
            .map_err(|e| anyhow!("failed to describe repositories: {}", format_sdk_error(&e)))
    }

    async fn create_repository(&self, repository_name: &str) -> Result<CreateRepositoryOutput> {
        self.client
            .create_repository()
            .repository_name(repository_name)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "failed to create repository '{}': {}",
                    repository_name,
                    format_sdk_error(&e)
                )
            })
    }

    async fn describe_images(
        &self,
        repository_name: &str,
        tag_status: Option<TagStatus>,
        registry_id: Option<&str>,
        next_token: Option<String>,
    ) -> Result<DescribeImagesOutput> {
        let mut request = self
            .client
            .describe_images()
            .repository_name(repository_name);
        if let Some(status) = tag_status {
            request = request.filter(DescribeImagesFilter::builder().tag_status(status).build());
        }
        if let Some(id) = registry_id {
            request = request.registry_id(id);
        }
        if let Some(token) = next_token {
            request = request.next_token(token);
        }

        request.send().await.map_err(|e| {
            anyhow!(
                "failed to describe images in repository '{}': {}",
                repository_name,
                format_sdk_error(&e)
            )
        })
    }
}
