/// Configuration sources
///
/// A config document is read either from a file on disk or from a file in a
/// GitHub repository through the contents API. Remote csv data sources reuse
/// the same fetch path.

use crate::{
    definitions::ConfigBase,
    error::{Error, Result},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;

/// Where the server reads its configuration from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Contents API URL, e.g. `https://api.github.com/repos/o/r/contents/taskjoin.yaml`
    GitHub(String),
}

impl ConfigSource {
    /// Read the document and the base its relative paths are anchored to
    pub async fn fetch(&self) -> Result<(String, ConfigBase)> {
        match self {
            ConfigSource::File(path) => {
                tracing::debug!("📄 Reading config file {}", path.display());
                let content = tokio::fs::read_to_string(path).await?;
                Ok((content, ConfigBase::for_file(path)))
            }
            ConfigSource::GitHub(url) => {
                tracing::debug!("🌐 Fetching config from {}", url);
                let bytes = fetch_remote(url).await?;
                let content = String::from_utf8(bytes)
                    .map_err(|e| Error::Remote(format!("config is not UTF-8: {}", e)))?;
                Ok((content, ConfigBase::for_url(url)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ConfigSource::File(path) => path.display().to_string(),
            ConfigSource::GitHub(url) => url.clone(),
        }
    }
}

/// GitHub contents API response (only the fields we read)
#[derive(Debug, Deserialize)]
struct GitHubContent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

/// Fetch a remote file
///
/// `api.github.com` URLs go through the contents API (base64 payload,
/// `GITHUB_TOKEN` when set); any other URL returns its raw body.
pub async fn fetch_remote(url: &str) -> Result<Vec<u8>> {
    let parsed =
        Url::parse(url).map_err(|e| Error::Remote(format!("invalid URL {}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Remote(format!("not an http(s) URL: {}", url)));
    }
    let github = is_github_api(&parsed);

    let client = reqwest::Client::new();
    let mut request = client.get(parsed).header("user-agent", "taskjoin");
    if github {
        request = request.header("accept", "application/vnd.github+json");
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                request = request.header("authorization", format!("token {}", token));
            }
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Remote(format!("request {}: {}", url, e)))?
        .error_for_status()
        .map_err(|e| Error::Remote(format!("request {}: {}", url, e)))?;

    if !github {
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Remote(format!("read {}: {}", url, e)))?;
        return Ok(body.to_vec());
    }

    let content: GitHubContent = response
        .json()
        .await
        .map_err(|e| Error::Remote(format!("decode response from {}: {}", url, e)))?;
    decode_github_content(&content)
}

fn is_github_api(url: &Url) -> bool {
    url.host_str() == Some("api.github.com")
}

fn decode_github_content(content: &GitHubContent) -> Result<Vec<u8>> {
    if content.content.is_empty() {
        return Err(Error::Remote("missing content".to_string()));
    }
    if content.encoding != "base64" {
        return Err(Error::Remote(format!("unknown encoding {}", content.encoding)));
    }
    let compact: String = content
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::Remote(format!("decode base64 content: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_github_content() {
        let content = GitHubContent {
            content: "d29ya2Zs\nb3dzOiBbXQ==\n".to_string(),
            encoding: "base64".to_string(),
        };
        assert_eq!(decode_github_content(&content).unwrap(), b"workflows: []");

        let wrong = GitHubContent {
            content: "abc".to_string(),
            encoding: "utf-8".to_string(),
        };
        assert!(matches!(decode_github_content(&wrong), Err(Error::Remote(_))));
    }

    #[test]
    fn test_github_host_detection() {
        let github = |url: &str| is_github_api(&Url::parse(url).unwrap());
        assert!(github("https://api.github.com/repos/a/b/contents/c.yaml?ref=v2"));
        assert!(!github("https://raw.githubusercontent.com/a/b/main/c.csv"));
        assert!(!github("https://api.github.com.example.org/repos/a/b/contents/c.yaml"));
        assert!(!github("https://example.org/api.github.com/c.yaml"));
    }

    #[tokio::test]
    async fn test_fetch_remote_rejects_non_http() {
        assert!(matches!(
            fetch_remote("ftp://example.org/c.csv").await,
            Err(Error::Remote(_))
        ));
        assert!(matches!(fetch_remote("not a url").await, Err(Error::Remote(_))));
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskjoin.yaml");
        std::fs::write(&path, "workflows: []\n").unwrap();

        let (content, base) = ConfigSource::File(path).fetch().await.unwrap();
        assert_eq!(content, "workflows: []\n");
        assert_eq!(base, ConfigBase::Directory(dir.path().to_path_buf()));
    }
}
