//! Filter configuration.

use serde::Deserialize;
use std::env;
use tracing::debug;

use crate::error::ConfigError;

pub const DISABLE_PREFIX: &str = "disablePrefix";
pub const DISABLE_MARKER: &str = "disableMarker";
pub const CAPTURE_REQUEST_BODY: &str = "captureRequestBody";
pub const CAPTURE_RESPONSE_BODY: &str = "captureResponseBody";

const PARAMETERS: [&str; 4] = [
    DISABLE_PREFIX,
    DISABLE_MARKER,
    CAPTURE_REQUEST_BODY,
    CAPTURE_RESPONSE_BODY,
];

const ENV_PREFIX: &str = "LOGGING_FILTER_";

/// Configuration for the logging filter.
///
/// Fixed once the layer is built; every request reads the same values.
///
/// # Examples
///
/// ```rust
/// use logging_filter::FilterConfig;
///
/// // Default configuration: prefixed, markered, both bodies captured
/// let config = FilterConfig::default();
/// assert!(!config.disable_prefix);
///
/// // From string init parameters
/// let config = FilterConfig::from_init_params([("disablePrefix", "true")]).unwrap();
/// assert!(config.disable_prefix);
/// assert!(!config.disable_marker);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    /// Emit bare JSON instead of `REQUEST: {...}` / `RESPONSE: {...}`
    pub disable_prefix: bool,
    /// Emit records without a `REQUEST` / `RESPONSE` marker
    pub disable_marker: bool,
    /// Whether to read and log request bodies
    pub capture_request_body: bool,
    /// Whether to capture and log response bodies
    pub capture_response_body: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            disable_prefix: false,
            disable_marker: false,
            capture_request_body: true,
            capture_response_body: true,
        }
    }
}

impl FilterConfig {
    /// Read options from name/value pairs handed over by the host at setup time.
    ///
    /// Unrecognized names are ignored. Missing options keep their defaults.
    pub fn from_init_params<I, K, V>(params: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (name, value) in params {
            let (name, value) = (name.as_ref(), value.as_ref());
            let slot = match name {
                DISABLE_PREFIX => &mut config.disable_prefix,
                DISABLE_MARKER => &mut config.disable_marker,
                CAPTURE_REQUEST_BODY => &mut config.capture_request_body,
                CAPTURE_RESPONSE_BODY => &mut config.capture_response_body,
                other => {
                    debug!(parameter = other, "Ignoring unrecognized init parameter");
                    continue;
                }
            };
            *slot = parse_flag(name, value)?;
        }

        Ok(config)
    }

    /// Read options from `LOGGING_FILTER_*` environment variables.
    ///
    /// `disablePrefix` is read from `LOGGING_FILTER_DISABLE_PREFIX`, and so on.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_init_params(
            PARAMETERS
                .iter()
                .filter_map(|name| env::var(env_key(name)).ok().map(|value| (*name, value))),
        )
    }
}

fn parse_flag(parameter: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            parameter: parameter.to_string(),
            value: value.to_string(),
        }),
    }
}

/// `disablePrefix` -> `LOGGING_FILTER_DISABLE_PREFIX`
fn env_key(parameter: &str) -> String {
    let mut key = String::from(ENV_PREFIX);
    for c in parameter.chars() {
        if c.is_ascii_uppercase() {
            key.push('_');
        }
        key.push(c.to_ascii_uppercase());
    }
    key
}
