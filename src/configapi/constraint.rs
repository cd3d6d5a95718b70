use super::client::ConfigClient;
use crate::errors::Result;
use crate::errors::error::PolicyError;
use url::Url;

/// Whether resources of `url` may be indexed.
///
/// A hostname is forbidden when it equals a forbidden entry or is one of its
/// subdomains, compared case-insensitively. A lookup failure is returned as
/// an error rather than an answer.
pub async fn check_hostname_allowed(client: &dyn ConfigClient, url: &str) -> Result<bool> {
    let parsed = Url::parse(url).map_err(|_| PolicyError::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| PolicyError::InvalidUrl(url.to_string()))?
        .trim_end_matches('.')
        .to_ascii_lowercase();

    let forbidden = client.get_forbidden_hostnames().await?;
    let blocked = forbidden.iter().any(|entry| {
        let denied = entry.hostname.trim().trim_end_matches('.').to_ascii_lowercase();
        !denied.is_empty()
            && (host == denied
                || host
                    .strip_suffix(denied.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    });

    Ok(!blocked)
}
