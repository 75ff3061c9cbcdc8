//! HTTP fetch boundary.
//!
//! The [`Fetcher`] trait is the only way the pipeline talks to the network,
//! so the generator can be driven by an in-memory fake in tests. The
//! production implementation, [`HttpFetcher`], issues a single GET per URL
//! through a shared `ureq` agent: bounded global timeout, bounded redirect
//! chain, descriptive `User-Agent`. There are no retries.

use crate::config::FetchConfig;
use std::time::Duration;
use thiserror::Error;
use ureq::Agent;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Transport { url, .. } | FetchError::Status { url, .. } => url,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport { .. } => None,
        }
    }
}

/// Fetch raw bytes for a URL. Implementations must be shareable across the
/// item worker pool.
///
/// Bodies are returned undecoded; pages keep their original bytes through
/// [`crate::rewrite::PageText`].
pub trait Fetcher: Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Largest response body accepted, in bytes.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

pub struct HttpFetcher {
    agent: Agent,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .max_redirects(config.max_redirects)
            .user_agent(config.user_agent.as_str())
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |e: ureq::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.agent.get(url).call().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let mut body = response.into_body();
        body.with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tiny_http::{Header, Response, Server};

    /// Serve `requests` requests on an ephemeral port, answering via `handler`.
    /// Returns the base URL and a handle yielding the User-Agent headers seen.
    fn serve<F>(requests: usize, handler: F) -> (String, thread::JoinHandle<Vec<String>>)
    where
        F: Fn(&str) -> (u16, Vec<(String, String)>, String) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr().to_ip().unwrap());
        let handle = thread::spawn(move || {
            let mut agents = Vec::new();
            for _ in 0..requests {
                let request = server.recv().unwrap();
                if let Some(ua) = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("User-Agent"))
                {
                    agents.push(ua.value.as_str().to_string());
                }
                let (status, headers, body) = handler(request.url());
                let mut response = Response::from_string(body).with_status_code(status);
                for (k, v) in headers {
                    response.add_header(Header::from_bytes(k.as_bytes(), v.as_bytes()).unwrap());
                }
                request.respond(response).unwrap();
            }
            agents
        });
        (base, handle)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            timeout_secs: 5,
            max_redirects: 5,
            user_agent: "site-mirror-test".into(),
        })
    }

    #[test]
    fn fetch_success_returns_body_and_sends_user_agent() {
        let (base, handle) = serve(1, |_| (200, vec![], "<html>hi</html>".into()));
        let body = fetcher().fetch(&format!("{base}/hello/")).unwrap();
        assert_eq!(body, b"<html>hi</html>");
        assert_eq!(handle.join().unwrap(), vec!["site-mirror-test".to_string()]);
    }

    #[test]
    fn non_success_status_is_failure() {
        let (base, handle) = serve(1, |_| (404, vec![], "missing".into()));
        let url = format!("{base}/gone/");
        let err = fetcher().fetch(&url).unwrap_err();
        assert_eq!(err, FetchError::Status { url, status: 404 });
        handle.join().unwrap();
    }

    #[test]
    fn follows_redirects() {
        let (base, handle) = serve(2, |path| {
            if path == "/old/" {
                (301, vec![("Location".into(), "/new/".into())], String::new())
            } else {
                (200, vec![], format!("at {path}"))
            }
        });
        let body = fetcher().fetch(&format!("{base}/old/")).unwrap();
        assert_eq!(body, b"at /new/");
        handle.join().unwrap();
    }

    #[test]
    fn redirect_loop_beyond_limit_fails() {
        let (base, handle) = serve(6, |_| {
            (302, vec![("Location".into(), "/loop/".into())], String::new())
        });
        let err = fetcher().fetch(&format!("{base}/loop/")).unwrap_err();
        assert!(err.status().is_none() || err.status() == Some(302));
        // The server may still be waiting for a request the client never sent.
        drop(handle);
    }

    #[test]
    fn connection_refused_is_transport_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = fetcher().fetch(&format!("http://127.0.0.1:{port}/")).unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
