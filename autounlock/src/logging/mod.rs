// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{fs::OpenOptions, io::stderr};

use anyhow::{Context, Result};
use tracing::{Level, debug, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt::time::UtcTime};
use tracing_subscriber_init::{Iso8601, TracingConfig, compact, try_init};

use crate::{
    config::{ConfigAutounlock, PathDefaults},
    error::Error,
};

/// Initialize tracing
pub(crate) fn initialize<T, U>(
    tracing_config: &T,
    config: &ConfigAutounlock,
    defaults: &U,
    layers_opt: Option<Vec<Box<dyn Layer<Registry> + Send + Sync>>>,
) -> Result<()>
where
    T: TracingConfig,
    U: PathDefaults,
{
    let mut layers = layers_opt.unwrap_or_default();

    // stdout is reserved for command output, so this layer writes to stderr
    if config.enable_std_output() {
        let (layer, level_filter) = compact(tracing_config);
        let level_filter = effective_level(config, level_filter);
        let filter = EnvFilter::builder()
            .with_default_directive(level_filter.into())
            .parse_lossy(directives(config, level_filter));
        let stderr_layer = layer
            .with_timer(UtcTime::new(Iso8601::DEFAULT))
            .with_writer(stderr)
            .with_filter(filter);
        layers.push(stderr_layer.boxed());
    }

    if let Some(tracing_absolute_path) = defaults.tracing_absolute_path() {
        let tracing_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&tracing_absolute_path)
            .with_context(|| Error::TracingFile(tracing_absolute_path.clone()))?;
        let (layer, level_filter) = compact(tracing_config);
        let level_filter = effective_level(config, level_filter);
        let filter = EnvFilter::builder()
            .with_default_directive(level_filter.into())
            .parse_lossy(directives(config, level_filter));
        let file_layer = layer
            .with_timer(UtcTime::new(Iso8601::DEFAULT))
            .with_ansi(false)
            .with_writer(tracing_file)
            .with_filter(filter);
        layers.push(file_layer.boxed());
    }

    try_init(layers)?;
    if config.debug_enabled() {
        debug!(marker = %config.debug_marker().display(), "Debug logging enabled");
    }
    Ok(())
}

/// Raise the level to at least debug while the debug marker exists
fn effective_level(config: &ConfigAutounlock, level_filter: LevelFilter) -> LevelFilter {
    if config.debug_enabled() {
        level_filter.max(LevelFilter::DEBUG)
    } else {
        level_filter
    }
}

fn directives(config: &ConfigAutounlock, level_filter: LevelFilter) -> String {
    let directives_base = match level_filter.into_level() {
        Some(level) => match level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        },
        None => "info",
    };

    if let Some(directives) = config.tracing().directives() {
        format!("{directives_base},{directives}")
    } else {
        directives_base.to_string()
    }
}
