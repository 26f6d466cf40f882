//! Request plumbing shared by both clients.

use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::{ForgeError, Result};

pub(crate) const USER_AGENT: &str = concat!("cibridge/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(ForgeError::from)
}

/// Parse `base` and append `prefix` as path segments.
pub(crate) fn parse_base(base: &str, prefix: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| ForgeError::Url(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ForgeError::Url(base.to_string()))?
        .pop_if_empty()
        .extend(prefix);
    Ok(url)
}

/// `base` with `segments` appended. Each segment is percent-encoded on its
/// own, so `owner/name` becomes `owner%2Fname`.
pub(crate) fn join(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ForgeError::Url(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn error_for(response: Response) -> ForgeError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    ForgeError::Http { status, message }
}

/// Decode a success body as JSON, or turn the response into an error.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_for(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ForgeError::Decode(e.to_string()))
}

/// Like [`read_json`] but maps `404` to `None`.
pub(crate) async fn read_optional<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    read_json(response).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_encodes_each_segment() {
        let base = parse_base("https://gitlab.example/", &["api", "v4"]).unwrap();
        let url = join(&base, &["projects", "QubesOS/qubes-core-admin", "pipelines"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example/api/v4/projects/QubesOS%2Fqubes-core-admin/pipelines"
        );
    }

    #[test]
    fn test_parse_base_keeps_existing_path() {
        let base = parse_base("https://example.com/gitlab", &["api", "v4"]).unwrap();
        assert_eq!(base.as_str(), "https://example.com/gitlab/api/v4");
    }

    #[test]
    fn test_parse_base_rejects_garbage() {
        assert!(matches!(
            parse_base("not a url", &[]),
            Err(ForgeError::Url(_))
        ));
    }
}
