//! Anti-blocking fetch layer: identity rotation, bounded-retry page fetches,
//! and jittered pacing between consecutive requests.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
pub use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "daph-fetch";

/// Stand-in pool of realistic desktop browser strings; callers can supply
/// their own pool instead.
pub const BUILTIN_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.2365.92",
];

/// One (egress, client-presentation) pair used for a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub proxy: String,
    pub user_agent: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("proxy pool is empty ({0})")]
    EmptyProxyPool(String),
    #[error("user agent pool is empty")]
    EmptyUserAgentPool,
    #[error("reading proxy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Draws a fresh identity pair per call, both pools sampled independently
/// and uniformly. The pipeline cannot run without evasion identities, so an
/// empty pool is a construction-time error.
#[derive(Debug, Clone)]
pub struct IdentityRotator {
    proxies: Vec<String>,
    user_agents: Vec<String>,
}

impl IdentityRotator {
    pub fn new(proxies: Vec<String>, user_agents: Vec<String>) -> Result<Self, IdentityError> {
        if proxies.is_empty() {
            return Err(IdentityError::EmptyProxyPool("no descriptors supplied".into()));
        }
        if user_agents.is_empty() {
            return Err(IdentityError::EmptyUserAgentPool);
        }
        Ok(Self {
            proxies,
            user_agents,
        })
    }

    /// Loads the egress pool from a plain-text file, one descriptor per line;
    /// blank lines and `#` comments are skipped. The client-presentation pool
    /// is [`BUILTIN_USER_AGENTS`].
    pub fn from_proxy_file(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| IdentityError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let proxies: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        if proxies.is_empty() {
            return Err(IdentityError::EmptyProxyPool(path.display().to_string()));
        }
        Self::new(
            proxies,
            BUILTIN_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
        )
    }

    pub fn next(&self) -> Identity {
        Identity {
            proxy: self.proxies[fastrand::usize(..self.proxies.len())].clone(),
            user_agent: self.user_agents[fastrand::usize(..self.user_agents.len())].clone(),
        }
    }
}

/// Bounds for one logical fetch operation.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub max_attempts: usize,
    pub timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Uniformly sampled pause applied between consecutive distinct fetches —
/// never between retries of the same target.
#[derive(Debug, Clone, Copy)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms.min(max_ms)),
            max: Duration::from_millis(min_ms.max(max_ms)),
        }
    }

    pub fn sample(&self) -> Duration {
        let span = self.max.saturating_sub(self.min);
        self.min + span.mul_f64(fastrand::f64())
    }

    pub async fn pause(&self) {
        tokio::time::sleep(self.sample()).await;
    }
}

/// Terminal outcome of a fetch whose retry budget ran out. Carries the last
/// observed status or transport cause; never raised mid-retry.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("{url}: gave up after {attempts} attempts, last status {status}")]
    Status {
        url: String,
        attempts: usize,
        status: StatusCode,
    },
    #[error("{url}: gave up after {attempts} attempts")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchFailure {
    pub fn attempts(&self) -> usize {
        match self {
            FetchFailure::Status { attempts, .. } | FetchFailure::Transport { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn last_status(&self) -> Option<StatusCode> {
        match self {
            FetchFailure::Status { status, .. } => Some(*status),
            FetchFailure::Transport { .. } => None,
        }
    }
}

enum AttemptError {
    Status(StatusCode),
    Transport(reqwest::Error),
}

/// Performs one logical fetch with bounded retries, each attempt under a
/// freshly drawn identity.
#[derive(Debug)]
pub struct ResilientFetcher {
    rotator: IdentityRotator,
    policy: FetchPolicy,
}

impl ResilientFetcher {
    pub fn new(rotator: IdentityRotator, policy: FetchPolicy) -> Self {
        Self { rotator, policy }
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    fn browsing_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pl-PL,pl;q=0.9"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers
    }

    fn client_for(&self, identity: &Identity) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.policy.timeout)
            .user_agent(identity.user_agent.clone())
            .default_headers(Self::browsing_headers())
            .proxy(reqwest::Proxy::all(&identity.proxy)?)
            .build()
    }

    /// Fetches `url` and returns the body as text. Success is a 2xx status;
    /// anything else burns one attempt and rotates the identity.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchFailure> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last: Option<AttemptError> = None;

        for attempt in 1..=attempts {
            let identity = self.rotator.next();
            let client = match self.client_for(&identity) {
                Ok(client) => client,
                Err(err) => {
                    debug!(%url, attempt, error = %err, "client build failed for drawn identity");
                    last = Some(AttemptError::Transport(err));
                    continue;
                }
            };

            match client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.text().await {
                            Ok(body) => return Ok(body),
                            Err(err) => {
                                debug!(%url, attempt, error = %err, "body read failed");
                                last = Some(AttemptError::Transport(err));
                            }
                        }
                    } else {
                        debug!(%url, attempt, %status, "fetch attempt rejected");
                        last = Some(AttemptError::Status(status));
                    }
                }
                Err(err) => {
                    debug!(%url, attempt, error = %err, "fetch attempt failed");
                    last = Some(AttemptError::Transport(err));
                }
            }
        }

        Err(match last.expect("retry loop always records an outcome") {
            AttemptError::Status(status) => FetchFailure::Status {
                url: url.to_string(),
                attempts,
                status,
            },
            AttemptError::Transport(source) => FetchFailure::Transport {
                url: url.to_string(),
                attempts,
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[test]
    fn empty_proxy_pool_is_a_configuration_error() {
        let err = IdentityRotator::new(Vec::new(), vec!["ua".into()]).expect_err("must fail");
        assert!(matches!(err, IdentityError::EmptyProxyPool(_)));

        let err =
            IdentityRotator::new(vec!["http://127.0.0.1:1".into()], Vec::new()).expect_err("must fail");
        assert!(matches!(err, IdentityError::EmptyUserAgentPool));
    }

    #[test]
    fn proxy_file_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "# egress list").expect("write");
        writeln!(file, "http://10.0.0.1:8080").expect("write");
        writeln!(file).expect("write");
        writeln!(file, "  http://10.0.0.2:8080  ").expect("write");

        let rotator = IdentityRotator::from_proxy_file(file.path()).expect("rotator");
        let identity = rotator.next();
        assert!(identity.proxy.starts_with("http://10.0.0."));
        assert!(!identity.user_agent.is_empty());
    }

    #[test]
    fn empty_proxy_file_fails_fast() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "# nothing but comments").expect("write");
        let err = IdentityRotator::from_proxy_file(file.path()).expect_err("must fail");
        assert!(matches!(err, IdentityError::EmptyProxyPool(_)));
    }

    #[test]
    fn rotation_draws_from_both_pools() {
        fastrand::seed(7);
        let rotator = IdentityRotator::new(
            vec!["http://a:1".into(), "http://b:1".into()],
            vec!["ua-one".into(), "ua-two".into(), "ua-three".into()],
        )
        .expect("rotator");

        let draws: Vec<Identity> = (0..64).map(|_| rotator.next()).collect();
        let distinct_proxies: std::collections::HashSet<_> =
            draws.iter().map(|i| i.proxy.as_str()).collect();
        let distinct_agents: std::collections::HashSet<_> =
            draws.iter().map(|i| i.user_agent.as_str()).collect();
        assert!(distinct_proxies.len() > 1);
        assert!(distinct_agents.len() > 1);
    }

    #[test]
    fn delay_samples_stay_in_range() {
        let range = DelayRange::from_millis(100, 400);
        for _ in 0..128 {
            let sampled = range.sample();
            assert!(sampled >= Duration::from_millis(100));
            assert!(sampled <= Duration::from_millis(400));
        }
    }

    /// Stub HTTP proxy that always answers 503 and records the User-Agent of
    /// every connection it accepts.
    async fn start_rejecting_proxy() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let user_agent = request
                        .lines()
                        .find(|line| line.to_ascii_lowercase().starts_with("user-agent:"))
                        .and_then(|line| line.split_once(':'))
                        .map(|(_, value)| value.trim().to_string())
                        .unwrap_or_default();
                    recorded.lock().await.push(user_agent);
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        )
                        .await;
                });
            }
        });

        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn exhaustion_burns_exactly_the_attempt_budget() {
        let (proxy_url, seen) = start_rejecting_proxy().await;
        let rotator = IdentityRotator::new(
            vec![proxy_url],
            vec!["ua-one".into(), "ua-two".into(), "ua-three".into()],
        )
        .expect("rotator");
        let fetcher = ResilientFetcher::new(
            rotator,
            FetchPolicy {
                max_attempts: 4,
                timeout: Duration::from_secs(5),
            },
        );

        let err = fetcher
            .fetch_text("http://jobs.example.invalid/listing")
            .await
            .expect_err("must report failure");

        assert_eq!(err.attempts(), 4);
        assert_eq!(err.last_status(), Some(StatusCode::SERVICE_UNAVAILABLE));

        let agents = seen.lock().await;
        assert_eq!(agents.len(), 4, "one connection per attempt");
        for agent in agents.iter() {
            assert!(["ua-one", "ua-two", "ua-three"].contains(&agent.as_str()));
        }
    }
}
