//! Platform clients for cibridge
//!
//! - [`GitLabClient`]: the CI mirror, implements `CiPlatform`
//! - [`GitHubClient`]: the source platform and status sink
//! - [`token`]: static and GitHub App installation tokens with caching

pub mod error;
pub mod github;
pub mod gitlab;
mod http;
pub mod token;

pub use error::{ForgeError, Result};
pub use github::GitHubClient;
pub use gitlab::{GitLabClient, GitLabConfig};
pub use token::{CachedToken, InstallationTokenSource, IssuedToken, StaticToken, TokenSource};
