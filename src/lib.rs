//! Thin client facade over AWS ECR.
//!
//! Wraps `aws-sdk-ecr` behind a small API: registry authorization tokens,
//! repository creation and existence probing, and paginated image listings
//! driven by a caller-supplied callback per page. Each call is independent
//! and stateless; all retry, signing, and transport concerns stay in the SDK.
//!
//! ```no_run
//! use ecr_client::{EcrClient, EcrConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = EcrClient::new(EcrConfig {
//!     region: "us-east-1".to_string(),
//!     access_key_id: None,
//!     secret_access_key: None,
//!     cache_dir: None,
//! })
//! .await?;
//!
//! client
//!     .get_images(&[], None, None, |images| {
//!         for image in images {
//!             println!("{:?}", image.image_digest());
//!         }
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;
pub mod endpoints;
pub mod models;

pub use client::api::EcrApi;
pub use client::EcrClient;
pub use credentials::{CredentialProvider, EcrCredentialProvider};
pub use models::{Auth, EcrConfig, RegistryAuth};
