//! Reporter configuration: the flat key/value view and option resolution.
//!
//! The host supplies a [`ConfigView`] once at startup. Recognised options are
//! declared as `(key, default, converter)` triples and looked up under the
//! `rollbar_` prefix. Options whose converted value is falsy are dropped, so
//! only meaningful values reach the reporting client.

use figment::{
    providers::{Env, Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use crate::error::ReporterError;

/// Prefix shared by every reporter configuration key.
pub const KEY_PREFIX: &str = "rollbar";

pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Loggers excluded from reporting unless configured otherwise.
pub const EXCLUDE_LOGGERS: &[&str] = &["hyper"];

pub const DEFAULT_DELIMITER: char = ',';

/// Options forwarded to the reporting client, in resolution order.
pub const ROLLBAR_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("access_token", "", Converter::TrimString),
    OptionSpec::new("branch", "", Converter::TrimString),
    OptionSpec::new("code_version", "", Converter::TrimString),
    OptionSpec::new("enabled", "", Converter::Boolean),
    OptionSpec::new("environment", "", Converter::TrimString),
];

/// Errors that can occur when loading a configuration view from disk.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// A raw configuration value as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Str(String),
    Bool(bool),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Immutable flat mapping of configuration keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigView {
    values: HashMap<String, ConfigValue>,
}

impl ConfigView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used when assembling a view by hand.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Loads a view from a TOML file.
    ///
    /// Environment variables prefixed with `ROLLBAR_` override file settings.
    /// String values may reference environment variables as `${VAR_NAME}`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(InterpolatingToml::file(path)?)
            .merge(Env::raw().filter(|key| {
                key.as_str()
                    .to_ascii_lowercase()
                    .starts_with(&format!("{KEY_PREFIX}_"))
            }));

        Self::from_figment(&figment)
    }

    /// Parses a view from a TOML string without consulting the environment.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(InterpolatingToml::string(content));
        Self::from_figment(&figment)
    }

    fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let raw: HashMap<String, RawValue> = figment.extract()?;

        let values = raw
            .into_iter()
            .filter(|(key, _)| key.starts_with(&format!("{KEY_PREFIX}_")))
            .filter_map(|(key, value)| {
                let value = match value {
                    RawValue::Bool(b) => ConfigValue::Bool(b),
                    RawValue::Int(n) => ConfigValue::Str(n.to_string()),
                    RawValue::Float(f) => ConfigValue::Str(f.to_string()),
                    RawValue::Str(s) => ConfigValue::Str(s),
                    RawValue::Other(_) => return None,
                };
                Some((key, value))
            })
            .collect();

        Ok(Self { values })
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigView
where
    K: Into<String>,
    V: Into<ConfigValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Other(IgnoredAny),
}

/// Conversion applied to a raw value before it becomes an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// Strip surrounding whitespace from a string.
    TrimString,
    /// Interpret the value as a boolean.
    Boolean,
}

impl Converter {
    /// Converts `raw`, naming `key` in the error when the value is malformed.
    pub fn convert(self, key: &str, raw: &ConfigValue) -> Result<OptionValue, ReporterError> {
        match (self, raw) {
            (Self::TrimString, ConfigValue::Str(s)) => Ok(OptionValue::Str(s.trim().to_owned())),
            (Self::TrimString, ConfigValue::Bool(b)) => Err(ReporterError::configuration(
                key,
                format!("expected a string, got boolean {b}"),
            )),
            (Self::Boolean, ConfigValue::Bool(b)) => Ok(OptionValue::Bool(*b)),
            (Self::Boolean, ConfigValue::Str(s)) => parse_bool(s)
                .map(OptionValue::Bool)
                .ok_or_else(|| ReporterError::configuration(key, format!("not a boolean: {s}"))),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Some(false),
        "1" | "true" | "yes" | "on" => Some(true),
        _ => None,
    }
}

/// Declaration of a single recognised option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub default: &'static str,
    pub converter: Converter,
}

impl OptionSpec {
    pub const fn new(key: &'static str, default: &'static str, converter: Converter) -> Self {
        Self {
            key,
            default,
            converter,
        }
    }
}

/// A converted option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Str(String),
    Bool(bool),
}

impl OptionValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Bool(_) => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(_) => None,
        }
    }
}

/// Options that survived conversion and falsy filtering, keyed by option name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    values: BTreeMap<String, OptionValue>,
}

impl ResolvedOptions {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(OptionValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_enabled(&self) -> bool {
        self.get("enabled")
            .and_then(OptionValue::as_bool)
            .unwrap_or(false)
    }

    /// Removes and returns a string option.
    pub fn take_str(&mut self, key: &str) -> Option<String> {
        match self.values.remove(key)? {
            OptionValue::Str(s) => Some(s),
            other => {
                self.values.insert(key.to_owned(), other);
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Full configuration key for an option name.
pub fn option_key(key: &str) -> String {
    format!("{KEY_PREFIX}_{key}")
}

/// Resolves the declared options against `view`.
pub fn resolve_options(
    view: &ConfigView,
    specs: &[OptionSpec],
) -> Result<ResolvedOptions, ReporterError> {
    let mut values = BTreeMap::new();

    for spec in specs {
        let key = option_key(spec.key);
        let default = ConfigValue::Str(spec.default.to_owned());
        let raw = view.get(&key).unwrap_or(&default);

        let value = spec.converter.convert(&key, raw)?;
        if value.is_truthy() {
            values.insert(spec.key.to_owned(), value);
        }
    }

    Ok(ResolvedOptions { values })
}

/// Splits `s` on `delimiter` into trimmed, non-empty tokens.
pub fn split_multiple(s: &str, delimiter: char) -> Vec<String> {
    s.split(delimiter)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Standalone settings resolved alongside the client options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterSettings {
    pub logging_level: tracing::Level,
    pub exclude_loggers: Vec<String>,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            logging_level: tracing::Level::WARN,
            exclude_loggers: EXCLUDE_LOGGERS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl ReporterSettings {
    /// Resolves the standalone settings. Unusable values fall back to their
    /// defaults with a warning; they never disable reporting.
    pub fn resolve(view: &ConfigView) -> Self {
        let level_key = option_key("logging_level");
        let logging_level = match string_setting(view, &level_key) {
            Some(raw) => parse_level(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    key = %level_key,
                    value = %raw,
                    default = DEFAULT_LOG_LEVEL,
                    "Unrecognised logging level, using default"
                );
                tracing::Level::WARN
            }),
            None => tracing::Level::WARN,
        };

        let loggers_key = option_key("exclude_loggers");
        let exclude_loggers = match string_setting(view, &loggers_key) {
            Some(raw) => split_multiple(&raw, DEFAULT_DELIMITER),
            None => EXCLUDE_LOGGERS.iter().map(|s| (*s).to_owned()).collect(),
        };

        Self {
            logging_level,
            exclude_loggers,
        }
    }
}

/// Level names as written in host configs, including the long forms.
fn parse_level(raw: &str) -> Option<tracing::Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "warning" => Some(tracing::Level::WARN),
        "critical" | "fatal" => Some(tracing::Level::ERROR),
        other => other.parse().ok(),
    }
}

fn string_setting(view: &ConfigView, key: &str) -> Option<String> {
    match view.get(key)? {
        ConfigValue::Str(s) => Some(s.clone()),
        ConfigValue::Bool(b) => {
            tracing::warn!(key = %key, value = *b, "Expected a string setting, using default");
            None
        }
    }
}

fn interpolate_value(value: Value) -> Value {
    match value {
        Value::String(_, s) => Value::from(interpolate_env(&s)),
        Value::Dict(tag, dict) => Value::Dict(
            tag,
            dict.into_iter()
                .map(|(k, v)| (k, interpolate_value(v)))
                .collect(),
        ),
        Value::Array(tag, items) => {
            Value::Array(tag, items.into_iter().map(interpolate_value).collect())
        }
        other => other,
    }
}

/// Expands `${VAR_NAME}` references. Unset variables expand to nothing; an
/// unterminated `${` is kept as written.
fn interpolate_env(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        if let Ok(val) = std::env::var(&rest[start + 2..start + 2 + len]) {
            result.push_str(&val);
        }
        rest = &rest[start + 3 + len..];
    }

    result.push_str(rest);
    result
}

/// TOML provider that expands `${VAR_NAME}` in string values.
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        Ok(Self { content })
    }

    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let base = Toml::string(&self.content).data()?;

        Ok(base
            .into_iter()
            .map(|(profile, dict)| {
                let dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, interpolate_value(v)))
                    .collect();
                (profile, dict)
            })
            .collect())
    }
}
