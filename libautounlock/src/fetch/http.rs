// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, trace};

use super::{Fetch, HTTP_PRIORITY};
use crate::{constants::MAX_HTTP_RESPONSE_BYTES, error::Error};

const INSECURE_PREFIX: &str = "https+insecure://";

/// Reads a share with a GET from `http://`, `https://` or
/// `https+insecure://` (no certificate verification)
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpFetcher;

/// A request ready to send: URL without userinfo, decoded credentials, and
/// whether certificates are checked
#[derive(Debug, Eq, PartialEq)]
struct Request {
    url: Url,
    credentials: Option<(String, String)>,
    insecure: bool,
}

impl Request {
    fn parse(path: &str) -> Result<Self> {
        let (text, insecure) = match path.strip_prefix(INSECURE_PREFIX) {
            Some(rest) => (format!("https://{rest}"), true),
            None => (path.to_string(), false),
        };
        let mut url = Url::parse(&text)
            .map_err(|e| Error::Config(format!("invalid share URL: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Config(format!("unsupported URL scheme: {other}")).into());
            }
        }

        let credentials = if url.username().is_empty() {
            None
        } else {
            let user = decode(url.username())?;
            let password = decode(url.password().unwrap_or_default())?;
            url.set_username("")
                .and_then(|()| url.set_password(None))
                .map_err(|()| Error::Config("cannot strip credentials from URL".into()))?;
            Some((user, password))
        };

        Ok(Self {
            url,
            credentials,
            insecure,
        })
    }
}

fn decode(part: &str) -> Result<String> {
    let decoded = percent_decode_str(part)
        .decode_utf8()
        .map_err(|e| Error::Config(format!("invalid URL credentials: {e}")))?;
    Ok(decoded.into_owned())
}

impl Fetch for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn matches(&self, path: &str) -> bool {
        path.starts_with("http")
    }

    fn priority(&self) -> i32 {
        HTTP_PRIORITY
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let request = Request::parse(path)?;
        if request.insecure {
            debug!("Certificate verification disabled for this share");
        }
        let client = Client::builder()
            .danger_accept_invalid_certs(request.insecure)
            .build()
            .with_context(|| Error::Fetch("failed to build HTTP client".into()))?;

        let mut builder = client.get(request.url);
        if let Some((user, password)) = &request.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        let mut response = builder
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| Error::Fetch("HTTP request failed".into()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Fetch(format!("server returned status {status}")).into());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| Error::Fetch("failed to read response body".into()))?
        {
            if body.len() + chunk.len() > MAX_HTTP_RESPONSE_BYTES {
                return Err(Error::Fetch(format!(
                    "response exceeds {MAX_HTTP_RESPONSE_BYTES} bytes"
                ))
                .into());
            }
            body.extend_from_slice(&chunk);
        }
        trace!(bytes = body.len(), "Read response body");
        let text = String::from_utf8(body)
            .map_err(|_| Error::Fetch("response body is not UTF-8".into()))?;
        Ok(text.trim().to_string())
    }
}
