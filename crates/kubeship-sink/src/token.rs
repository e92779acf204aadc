//! Access tokens for the cloud logging API

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use kubeship_logs::TtlCache;
use serde::Deserialize;
use tracing::debug;

/// GCE metadata server endpoint for the default service account token
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens fetched from the metadata server are reused this long
pub const TOKEN_TTL: Duration = Duration::from_secs(300);

const TOKEN_KEY: &str = "default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

type TokenResult = Result<Arc<String>, Arc<String>>;

/// Where the bearer token for writes comes from
#[derive(Clone)]
pub enum TokenSource {
    /// Unauthenticated writes (local emulators, proxies)
    None,
    Static(String),
    MetadataServer {
        client: reqwest::Client,
        url: String,
        cache: TtlCache<TokenResult>,
    },
}

impl TokenSource {
    pub fn metadata_server(client: reqwest::Client) -> Self {
        Self::metadata_server_at(client, METADATA_TOKEN_URL)
    }

    pub fn metadata_server_at(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self::MetadataServer {
            client,
            url: url.into(),
            cache: TtlCache::new(),
        }
    }

    /// Current token, if this source has one
    ///
    /// A failed fetch is not cached; the next call tries again.
    pub async fn token(&self) -> anyhow::Result<Option<Arc<String>>> {
        match self {
            Self::None => Ok(None),
            Self::Static(token) => Ok(Some(Arc::new(token.clone()))),
            Self::MetadataServer { client, url, cache } => {
                let (client, url) = (client.clone(), url.clone());
                let lookup = cache.get_or_compute(TOKEN_KEY, TOKEN_TTL, move || async move {
                    fetch_token(&client, &url)
                        .await
                        .map(Arc::new)
                        .map_err(|e| Arc::new(format!("{:#}", e)))
                });

                match lookup.clone().await {
                    Ok(token) => Ok(Some(token)),
                    Err(e) => {
                        cache.remove_if_same(TOKEN_KEY, &lookup);
                        Err(anyhow!("Failed to get access token: {}", e))
                    }
                }
            }
        }
    }
}

impl Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "TokenSource::None"),
            Self::Static(_) => write!(f, "TokenSource::Static"),
            Self::MetadataServer { url, .. } => write!(f, "TokenSource::MetadataServer({})", url),
        }
    }
}

async fn fetch_token(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let response = client
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context("Failed to reach metadata server")?
        .error_for_status()
        .context("Metadata server rejected token request")?;

    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;
    debug!("fetched access token from metadata server");
    Ok(token.access_token)
}
