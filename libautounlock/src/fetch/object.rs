// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{path::Path, str::FromStr};

use anyhow::{Context, Result};
use opendal::{Operator, Scheme};
use reqwest::Url;
use tracing::trace;

use super::{Fetch, OBJECT_PRIORITY};
use crate::error::Error;

/// Reads a share from a local file or any object storage backend.
///
/// * `/path/to/share` or `relative/share`: a local file
/// * `:scheme[,key=value...]:root/path/share`: a remote object, the options
///   become backend configuration
/// * `:http,url=<URL>`: a plain HTTP object
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectFetcher;

/// A backend, its configuration and the object name to read under its root
#[derive(Debug, Eq, PartialEq)]
struct ObjectLocation {
    scheme: String,
    options: Vec<(String, String)>,
    name: String,
}

impl ObjectLocation {
    fn parse(path: &str) -> Result<Self> {
        match path.strip_prefix(':') {
            None => Self::local(path),
            Some(rest) if rest.starts_with("http,") => Self::http(rest),
            Some(rest) => Self::remote(rest),
        }
    }

    fn local(path: &str) -> Result<Self> {
        let (dir, name) = match path.rfind('/') {
            None => (".", path),
            Some(0) => ("/", &path[1..]),
            Some(idx) => (&path[..idx], &path[idx + 1..]),
        };
        if name.is_empty() {
            return Err(Error::Config("local share path has no file name".into()).into());
        }
        let root = std::path::absolute(Path::new(dir))
            .with_context(|| Error::Config("cannot resolve share directory".into()))?;
        Ok(Self {
            scheme: "fs".to_string(),
            options: vec![("root".to_string(), root.to_string_lossy().into_owned())],
            name: name.to_string(),
        })
    }

    fn http(rest: &str) -> Result<Self> {
        let (_, options) = parse_options(rest.strip_suffix(':').unwrap_or(rest));
        let url_text = options
            .iter()
            .find_map(|(k, v)| (k == "url").then_some(v.as_str()))
            .ok_or_else(|| Error::Config("http object path needs url=<URL>".into()))?;
        let url = Url::parse(url_text)
            .map_err(|e| Error::Config(format!("invalid object URL: {e}")))?;
        let mut name = url.path().to_string();
        if let Some(query) = url.query() {
            name.push('?');
            name.push_str(query);
        }
        Ok(Self {
            scheme: "http".to_string(),
            options: vec![("endpoint".to_string(), url.origin().ascii_serialization())],
            name,
        })
    }

    fn remote(rest: &str) -> Result<Self> {
        let idx = rest
            .rfind(':')
            .ok_or_else(|| Error::Config("invalid backend path, expected :scheme:path".into()))?;
        let (backend, object) = (&rest[..idx], &rest[idx + 1..]);
        let slash = object
            .rfind('/')
            .ok_or_else(|| Error::Config("invalid backend path, no object name".into()))?;
        let (root, name) = (&object[..slash], &object[slash + 1..]);
        if name.is_empty() {
            return Err(Error::Config("invalid backend path, no object name".into()).into());
        }

        let (scheme, mut options) = parse_options(backend);
        if scheme.is_empty() {
            return Err(Error::Config("invalid backend path, no scheme".into()).into());
        }
        let root = bucket_from_root(&scheme, root, &mut options);
        options.push(("root".to_string(), format!("/{root}")));
        Ok(Self {
            scheme,
            options,
            name: name.to_string(),
        })
    }

    async fn read(&self) -> Result<Vec<u8>> {
        let scheme = Scheme::from_str(&self.scheme)
            .with_context(|| Error::Config(format!("unknown storage backend {}", self.scheme)))?;
        let operator = Operator::via_iter(scheme, self.options.clone())
            .with_context(|| Error::Fetch(format!("failed to create {} backend", self.scheme)))?;
        let buffer = operator
            .read(&self.name)
            .await
            .with_context(|| Error::Fetch(format!("failed to read object from {}", self.scheme)))?;
        Ok(buffer.to_vec())
    }
}

/// `scheme,key=value,key="quoted value"` into the scheme and its options
fn parse_options(backend: &str) -> (String, Vec<(String, String)>) {
    let mut parts = backend.split(',');
    let scheme = parts.next().unwrap_or_default().trim().to_string();
    let options = parts
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect();
    (scheme, options)
}

/// Bucket style backends take their bucket or container from the first root
/// segment unless it was given as an option.
fn bucket_from_root<'a>(scheme: &str, root: &'a str, options: &mut Vec<(String, String)>) -> &'a str {
    let key = match scheme {
        "s3" | "gcs" | "oss" | "obs" | "cos" => "bucket",
        "azblob" => "container",
        _ => return root,
    };
    if options.iter().any(|(k, _)| k == key) {
        return root;
    }
    let (bucket, rest) = root.split_once('/').unwrap_or((root, ""));
    if !bucket.is_empty() {
        options.push((key.to_string(), bucket.to_string()));
    }
    rest
}

impl Fetch for ObjectFetcher {
    fn name(&self) -> &'static str {
        "object"
    }

    fn matches(&self, _path: &str) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        OBJECT_PRIORITY
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let location = ObjectLocation::parse(path)?;
        trace!(scheme = %location.scheme, "Reading object");
        let bytes = location.read().await?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::Fetch("object is not UTF-8".into()))?;
        Ok(text.trim().to_string())
    }
}
