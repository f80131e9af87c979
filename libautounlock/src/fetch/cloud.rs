// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::fmt;

use anyhow::Result;
use regex::Regex;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CLOUD_PRIORITY, Fetch};
use crate::error::Error;

const SECRETS_PREFIX: &str = "aws-secrets://";
const SSM_PREFIX: &str = "aws-ssm://";
const LOCATION_PATTERN: &str = r"^([^:]+):([^@]+)@([^/]+)/(.+)$";

/// `accessKey:secretKey@region/resourceName`
#[derive(Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
struct CloudLocation {
    access_key: String,
    secret_key: String,
    region: String,
    resource: String,
}

impl fmt::Debug for CloudLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudLocation")
            .field("region", &self.region)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl CloudLocation {
    fn parse(path: &str, prefix: &str) -> Result<Self> {
        let rest = path.strip_prefix(prefix).unwrap_or(path);
        let pattern = Regex::new(LOCATION_PATTERN)
            .map_err(|e| Error::Config(format!("invalid location pattern: {e}")))?;
        let captures = pattern.captures(rest).ok_or_else(|| {
            Error::Config(format!(
                "invalid {prefix} path, expected {prefix}accessKey:secretKey@region/name"
            ))
        })?;
        let group = |i: usize| {
            captures
                .get(i)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        Ok(Self {
            access_key: group(1),
            secret_key: group(2),
            region: group(3),
            resource: group(4),
        })
    }
}

/// Reads a share from a secret in the cloud secret store
#[derive(Clone, Copy, Debug, Default)]
pub struct SecretStoreFetcher;

impl Fetch for SecretStoreFetcher {
    fn name(&self) -> &'static str {
        "aws-secrets"
    }

    fn matches(&self, path: &str) -> bool {
        path.starts_with(SECRETS_PREFIX)
    }

    fn priority(&self) -> i32 {
        CLOUD_PRIORITY
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        use aws_sdk_secretsmanager::{
            Client, Config,
            config::{BehaviorVersion, Credentials, Region},
            error::DisplayErrorContext,
        };

        let location = CloudLocation::parse(path, SECRETS_PREFIX)?;
        trace!(region = %location.region, "Fetching secret");
        let config = Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(location.region.clone()))
            .credentials_provider(Credentials::new(
                location.access_key.clone(),
                location.secret_key.clone(),
                None,
                None,
                "autounlock",
            ))
            .build();
        let client = Client::from_conf(config);
        let output = client
            .get_secret_value()
            .secret_id(location.resource.clone())
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("failed to get secret value: {}", DisplayErrorContext(&e))))?;
        let value = output
            .secret_string()
            .ok_or_else(|| Error::Fetch("secret string is empty".into()))?;
        Ok(value.trim().to_string())
    }
}

/// Reads a share from an encrypted parameter in the cloud parameter store
#[derive(Clone, Copy, Debug, Default)]
pub struct ParameterStoreFetcher;

impl Fetch for ParameterStoreFetcher {
    fn name(&self) -> &'static str {
        "aws-ssm"
    }

    fn matches(&self, path: &str) -> bool {
        path.starts_with(SSM_PREFIX)
    }

    fn priority(&self) -> i32 {
        CLOUD_PRIORITY
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        use aws_sdk_ssm::{
            Client, Config,
            config::{BehaviorVersion, Credentials, Region},
            error::DisplayErrorContext,
        };

        let location = CloudLocation::parse(path, SSM_PREFIX)?;
        trace!(region = %location.region, "Fetching parameter");
        let config = Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(location.region.clone()))
            .credentials_provider(Credentials::new(
                location.access_key.clone(),
                location.secret_key.clone(),
                None,
                None,
                "autounlock",
            ))
            .build();
        let client = Client::from_conf(config);
        let output = client
            .get_parameter()
            .name(location.resource.clone())
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("failed to get parameter: {}", DisplayErrorContext(&e))))?;
        let value = output
            .parameter()
            .and_then(|parameter| parameter.value())
            .ok_or_else(|| Error::Fetch("parameter value is empty".into()))?;
        Ok(value.trim().to_string())
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;

    use super::{CloudLocation, ParameterStoreFetcher, SSM_PREFIX, SECRETS_PREFIX, SecretStoreFetcher};
    use crate::{
        error::{Error, classify},
        fetch::Fetch,
    };

    #[test]
    fn parse_works() -> Result<()> {
        let location = CloudLocation::parse(
            "aws-secrets://AKIAEXAMPLE:wJal/rXUtn+FEMI@us-west-2/unlock/share-2",
            SECRETS_PREFIX,
        )?;
        assert_eq!(location.access_key, "AKIAEXAMPLE");
        assert_eq!(location.secret_key, "wJal/rXUtn+FEMI");
        assert_eq!(location.region, "us-west-2");
        assert_eq!(location.resource, "unlock/share-2");
        Ok(())
    }

    #[test]
    fn debug_hides_credentials() -> Result<()> {
        let location = CloudLocation::parse("aws-ssm://AK:SK@eu-west-1/param", SSM_PREFIX)?;
        let debug = format!("{location:?}");
        assert!(debug.contains("eu-west-1"));
        assert!(!debug.contains("SK"));
        Ok(())
    }

    #[test]
    fn malformed_paths_are_config_errors() {
        for path in [
            "aws-ssm://no-credentials@us-east-1/p",
            "aws-ssm://ak:sk@us-east-1",
            "aws-ssm://ak:sk@us-east-1/",
            "aws-ssm://",
        ] {
            let err = CloudLocation::parse(path, SSM_PREFIX).unwrap_err();
            assert!(matches!(classify(&err), Some(Error::Config(_))), "{path}");
        }
    }

    #[test]
    fn matches_works() {
        assert!(SecretStoreFetcher.matches("aws-secrets://a:b@r/n"));
        assert!(!SecretStoreFetcher.matches("aws-ssm://a:b@r/n"));
        assert!(ParameterStoreFetcher.matches("aws-ssm://a:b@r/n"));
        assert!(!ParameterStoreFetcher.matches("aws-secrets://a:b@r/n"));
    }
}
