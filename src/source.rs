use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use url::Url;

/// Where issue archives come from. The pipeline only needs a byte stream
/// for a locator; tests swap in an in-memory source.
pub trait ArchiveSource: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpSourceConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct HttpArchiveSource {
    http: HttpClient,
    user_agent: String,
}

impl HttpArchiveSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("archive source user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => {
                let mut builder = HttpClient::builder();
                if let Some(timeout) = config.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build().context("build archive http client")?
            }
        };

        Ok(Self {
            http,
            user_agent: config.user_agent,
        })
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        let parsed = Url::parse(url).with_context(|| format!("invalid issue url {url:?}"))?;
        let response = self
            .http
            .get(parsed)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("request issue archive")?;

        if !response.status().is_success() {
            return Err(anyhow!("request failed with status {}", response.status()));
        }

        Ok(Box::new(response))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn source() -> HttpArchiveSource {
        HttpArchiveSource::new(HttpSourceConfig {
            user_agent: "phrack-tui-test".into(),
            timeout: Some(Duration::from_secs(5)),
            http_client: None,
        })
        .unwrap()
    }

    #[test]
    fn rejects_empty_user_agent() {
        assert!(HttpArchiveSource::new(HttpSourceConfig::default()).is_err());
    }

    #[test]
    fn rejects_malformed_url() {
        let err = source().open("not a url").err().unwrap();
        assert!(err.to_string().contains("invalid issue url"));
    }

    #[test]
    fn streams_body_and_reports_status() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = thread::spawn(move || {
            for _ in 0..2 {
                let request = server.recv().unwrap();
                let response = if request.url().ends_with("phrack1.tar.gz") {
                    tiny_http::Response::from_data(b"archive-bytes".to_vec())
                } else {
                    tiny_http::Response::from_string("missing").with_status_code(404)
                };
                request.respond(response).unwrap();
            }
        });

        let base = format!("http://{addr}");
        let mut body = String::new();
        source()
            .open(&format!("{base}/phrack1.tar.gz"))
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "archive-bytes");

        let err = source().open(&format!("{base}/phrack2.tar.gz")).err().unwrap();
        assert!(err.to_string().contains("404"), "got {err}");
        handle.join().unwrap();
    }
}
