//! Build arguments.
//!
//! Holds `--build-arg` overrides and the `ARG` defaults declared by a
//! Dockerfile, and produces the environment used for variable substitution.

use std::collections::HashMap;

use strata_core::error::{Result, StrataError};

/// Build-argument values for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Values passed on the command line, by name
    overrides: HashMap<String, String>,
    /// Declared `ARG` names with their defaults, in declaration order
    declared: Vec<(String, Option<String>)>,
}

impl BuildArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `KEY=VALUE` strings as given on the command line.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut args = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StrataError::Config(format!(
                    "Invalid build arg format '{}': expected KEY=VALUE",
                    pair
                ))
            })?;
            if key.is_empty() {
                return Err(StrataError::Config(format!(
                    "Invalid build arg '{}': empty key",
                    pair
                )));
            }
            args.set(key, value);
        }
        Ok(args)
    }

    /// Set an override value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(key.into(), value.into());
    }

    /// Record an `ARG` declaration.
    pub fn declare(&mut self, name: impl Into<String>, default: Option<String>) {
        let name = name.into();
        if let Some(existing) = self.declared.iter_mut().find(|(n, _)| *n == name) {
            if default.is_some() {
                existing.1 = default;
            }
            return;
        }
        self.declared.push((name, default));
    }

    /// Override value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Override value for `key`, matching the name case-insensitively.
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| {
            self.overrides
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn overrides(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    /// Effective value of every declared argument: the override when one
    /// was given, else the declared default. Arguments with neither are
    /// omitted.
    pub fn declared_values(&self) -> Vec<(String, String)> {
        self.declared
            .iter()
            .filter_map(|(name, default)| {
                self.overrides
                    .get(name)
                    .cloned()
                    .or_else(|| default.clone())
                    .map(|v| (name.clone(), v))
            })
            .collect()
    }

    /// Environment for substitution: build args first, then the image
    /// config environment, which wins on a name clash.
    pub fn replacement_envs(&self, config_env: &[(String, String)]) -> Vec<(String, String)> {
        let mut env = self.declared_values();
        env.extend(config_env.iter().cloned());
        env
    }
}
