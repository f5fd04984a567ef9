//! Online metadata fetching over HTTP(S), and the slice of client
//! configuration the verification core consumes.

use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use uptane_common::fetcher::MetadataFetcher;
use uptane_common::{RepositoryType, Role, UptaneError, Version};

/// Configuration consumed by the metadata core. Loading this from a file
/// is the embedding application's business; the core only reads the
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Vehicle-specific Director repository.
    pub director_server: Url,
    /// Fleet-wide Image repository.
    pub repo_server: Url,
    /// Local cache location hint for metadata.
    pub metadata_path: PathBuf,
    /// Accept keyids that are not the hash of their key. Compatibility
    /// knob for non-compliant servers; never skips signature checks.
    #[serde(default)]
    pub disable_keyid_validation: bool,
    /// Whether the caller should poll for updates.
    #[serde(default = "default_polling")]
    pub polling: bool,
    /// Polling cadence in seconds. The core itself is pull-on-demand.
    #[serde(default = "default_polling_sec")]
    pub polling_sec: u64,
}

fn default_polling() -> bool {
    true
}

fn default_polling_sec() -> u64 {
    10
}

/// Fetches role metadata with HTTP GET from the configured repositories.
/// Stateless; every call is an independent request.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    director_server: Url,
    repo_server: Url,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Self {
        Self::with_servers(config.director_server.clone(), config.repo_server.clone())
    }

    pub fn with_servers(director_server: Url, repo_server: Url) -> Self {
        HttpFetcher {
            client: reqwest::blocking::Client::new(),
            director_server,
            repo_server,
        }
    }

    fn role_url(
        &self,
        repo: RepositoryType,
        role: &Role,
        version: Option<Version>,
    ) -> Result<Url, ()> {
        let base = match repo {
            RepositoryType::Director => &self.director_server,
            RepositoryType::Image => &self.repo_server,
        };
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| ())?;
            segments.pop_if_empty();
            if role.is_delegation() {
                segments.push("delegations");
            }
            segments.push(&role.filename(version));
        }
        Ok(url)
    }
}

impl MetadataFetcher for HttpFetcher {
    fn fetch_role(
        &self,
        repo: RepositoryType,
        role: &Role,
        version: Option<Version>,
        max_size: u64,
    ) -> Result<Vec<u8>, UptaneError> {
        let fetch_failure = || UptaneError::MetadataFetchFailure {
            repo,
            role: role.name().to_owned(),
        };

        let url = self.role_url(repo, role, version).map_err(|()| fetch_failure())?;
        let mut response = self.client.get(url.as_str()).send().map_err(|err| {
            debug!(%url, "metadata request failed: {err}");
            fetch_failure()
        })?;
        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "metadata request rejected");
            return Err(fetch_failure());
        }

        // Enforce the cap while the transfer is in progress; a server that
        // keeps sending past it gets cut off and the partial body dropped.
        let mut body = Vec::new();
        let mut chunk = [0u8; 8 * 1024];
        loop {
            let read = response.read(&mut chunk).map_err(|_| fetch_failure())?;
            if read == 0 {
                break;
            }
            if body.len() as u64 + read as u64 > max_size {
                debug!(%url, max_size, "metadata transfer exceeded the size cap");
                return Err(fetch_failure());
            }
            body.extend_from_slice(&chunk[..read]);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Serve one canned HTTP response on an ephemeral port.
    fn one_shot_server(status_line: &'static str, body: Vec<u8>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = std::io::Read::read(&mut stream, &mut request);
            let header = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[test]
    fn test_fetch_role_success() {
        let base = one_shot_server("HTTP/1.1 200 OK", b"{\"signed\":{}}".to_vec());
        let fetcher = HttpFetcher::with_servers(base.clone(), base);
        let body = fetcher
            .fetch_latest_role(RepositoryType::Director, &Role::Targets, 1024)
            .unwrap();
        assert_eq!(body, b"{\"signed\":{}}");
    }

    #[test]
    fn test_fetch_role_not_found() {
        let base = one_shot_server("HTTP/1.1 404 Not Found", Vec::new());
        let fetcher = HttpFetcher::with_servers(base.clone(), base);
        let err = fetcher
            .fetch_role(RepositoryType::Director, &Role::Root, Some(2), 1024)
            .unwrap_err();
        assert!(matches!(err, UptaneError::MetadataFetchFailure { .. }));
    }

    #[test]
    fn test_fetch_role_size_cap_cuts_transfer() {
        let base = one_shot_server("HTTP/1.1 200 OK", vec![b'x'; 64 * 1024]);
        let fetcher = HttpFetcher::with_servers(base.clone(), base);
        let err = fetcher
            .fetch_latest_role(RepositoryType::Image, &Role::Timestamp, 16 * 1024)
            .unwrap_err();
        assert_eq!(
            err,
            UptaneError::MetadataFetchFailure {
                repo: RepositoryType::Image,
                role: "timestamp".to_owned(),
            }
        );
    }

    #[test]
    fn test_role_urls() {
        let fetcher = HttpFetcher::with_servers(
            Url::parse("https://director.example.com/api/v1/").unwrap(),
            Url::parse("https://repo.example.com").unwrap(),
        );
        assert_eq!(
            fetcher
                .role_url(RepositoryType::Director, &Role::Root, Some(3))
                .unwrap()
                .as_str(),
            "https://director.example.com/api/v1/3.root.json"
        );
        assert_eq!(
            fetcher
                .role_url(RepositoryType::Image, &Role::Targets, None)
                .unwrap()
                .as_str(),
            "https://repo.example.com/targets.json"
        );
        assert_eq!(
            fetcher
                .role_url(
                    RepositoryType::Image,
                    &Role::Delegation("installers".to_owned()),
                    None
                )
                .unwrap()
                .as_str(),
            "https://repo.example.com/delegations/installers.json"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "director_server": "https://director.example.com",
            "repo_server": "https://repo.example.com",
            "metadata_path": "/var/sota/metadata",
        }))
        .unwrap();
        assert!(!config.disable_keyid_validation);
        assert!(config.polling);
        assert_eq!(config.polling_sec, 10);
    }
}
