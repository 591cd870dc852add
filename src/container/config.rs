//! Declarative container configuration and layer merging.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ContainerError;

/// Default container subcommand when a descriptor does not embed one.
pub const DEFAULT_SUBCOMMAND: &str = "exec";

fn default_inherit() -> bool {
    true
}

/// Container settings at one configuration level (global, pipeline, step, descriptor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ContainerConfig {
    /// Container engine executable (e.g. `apptainer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra arguments placed after the subcommand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables forwarded into the container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
    /// Whether this level merges with the next less specific level.
    #[serde(default = "default_inherit")]
    pub inherit: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env_vars: BTreeMap::new(),
            inherit: true,
        }
    }
}

impl ContainerConfig {
    /// Creates a config with the given engine command.
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Adds an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Sets the INHERIT flag.
    pub fn with_inherit(mut self, inherit: bool) -> Self {
        self.inherit = inherit;
        self
    }

    /// Merges `self` (more specific) with `other` (less specific).
    ///
    /// - `ARGS`: `other`'s arguments come first, then `self`'s. Lists are
    ///   always concatenated, even when identical, so merging is associative
    ///   and flag/value pairs are never split.
    /// - `ENV_VARS`: `self` wins; `other` only fills absent keys.
    /// - `COMMAND`: kept from `self` unless `overwrite_command` is set and
    ///   `other` defines one. An unset command is filled from `other`.
    /// - `INHERIT`: kept from `self`.
    pub fn merge(&self, other: &ContainerConfig, overwrite_command: bool) -> ContainerConfig {
        let command = if overwrite_command && other.command.is_some() {
            other.command.clone()
        } else {
            self.command.clone().or_else(|| other.command.clone())
        };

        let args = other.args.iter().chain(self.args.iter()).cloned().collect();

        let mut env_vars = other.env_vars.clone();
        env_vars.extend(self.env_vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        ContainerConfig {
            command,
            args,
            env_vars,
            inherit: self.inherit,
        }
    }

    /// Resolves the effective config from layers ordered most to least specific.
    ///
    /// The chain stops at the first layer whose `INHERIT` flag is false:
    /// that layer is merged, its parents are not.
    pub fn resolve(layers: &[&ContainerConfig]) -> ContainerConfig {
        let mut layers = layers.iter();
        let Some(first) = layers.next() else {
            return ContainerConfig::default();
        };

        let mut effective = (*first).clone();
        let mut inherit = first.inherit;
        for layer in layers {
            if !inherit {
                break;
            }
            effective = effective.merge(layer, false);
            inherit = layer.inherit;
        }
        effective
    }

    /// Merges a config embedded in a pipeline descriptor into a resolved config.
    ///
    /// The embedded config is the more specific side for `ARGS` and
    /// `ENV_VARS`. Its `COMMAND` only replaces the resolved one when
    /// `overwrite_command` is requested.
    pub fn with_embedded(&self, embedded: &ContainerConfig, overwrite_command: bool) -> ContainerConfig {
        let mut merged = embedded.merge(self, false);
        merged.command = if overwrite_command && embedded.command.is_some() {
            embedded.command.clone()
        } else {
            self.command.clone()
        };
        merged.inherit = self.inherit;
        merged
    }
}

/// Container settings a descriptor may carry under `custom.studyforge`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedContainerSettings {
    pub config: Option<ContainerConfig>,
    pub subcommand: Option<String>,
}

impl EmbeddedContainerSettings {
    /// Extracts embedded container settings from a descriptor document.
    pub fn from_descriptor(descriptor: &serde_json::Value) -> Result<Self, ContainerError> {
        let Some(custom) = descriptor.pointer("/custom/studyforge") else {
            return Ok(Self::default());
        };

        let config = match custom.get("CONTAINER_CONFIG") {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<ContainerConfig>(value.clone())
                    .map_err(|e| ContainerError::InvalidEmbeddedConfig(e.to_string()))?,
            ),
        };

        let subcommand = match custom.get("CONTAINER_SUBCOMMAND") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(ContainerError::InvalidEmbeddedConfig(format!(
                    "CONTAINER_SUBCOMMAND must be a string, got {other}"
                )))
            }
        };

        Ok(Self { config, subcommand })
    }
}
