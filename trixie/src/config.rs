//! Types for configuring a [`Session`](crate::session::Session).
//!
//! The central type here is [`TrixieConfig`], which carries everything a
//! session needs to start: admission limits, the client liveness timeout,
//! frame pacing, the hotplug fallback policy, and the outputs to bring up
//! at startup. Build one with [`TrixieConfigBuilder`].

use std::time::Duration;

use crate::core::types::Point;
use crate::output::OutputMode;
use crate::{Result, TrixieError::*};

/// An output to bring up when the session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub(crate) name: String,
    pub(crate) mode: OutputMode,
    pub(crate) scale: f32,
    pub(crate) position: Point,
}

impl OutputSpec {
    /// Creates a new output spec.
    pub fn new<S: Into<String>>(name: S, mode: OutputMode, scale: f32, position: Point) -> Self {
        Self {
            name: name.into(),
            mode,
            scale,
            position,
        }
    }
}

/// The central configuration object.
///
/// `TrixieConfig` provides a `validate` method that ensures it is valid
/// and can be used in a `Session`. While this checks the predefined
/// invariants on the config, it can also run user-defined code to ensure
/// that user-defined invariants are also upheld.
///
/// # Construction
///
/// To build a TrixieConfig, use the [`TrixieConfigBuilder`] type.
///
/// # Example
///
/// ```rust
/// # use trixie::config::NO_CHECKS;
/// use trixie::TrixieConfig;
///
/// // create a default config that upholds all invariants
/// let config = TrixieConfig::new();
///
/// config.validate(NO_CHECKS).expect("invalid config");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TrixieConfig {
    /// The maximum number of simultaneously connected clients.
    pub(crate) max_clients: usize,
    /// How long a client may go without issuing a request before it is
    /// forcibly disconnected. `None` disables the sweep.
    pub(crate) client_timeout: Option<Duration>,
    /// How many ticks an output batches commits before composing.
    pub(crate) collect_budget: u32,
    /// Whether surfaces orphaned by a detached output are reassigned to
    /// a surviving output instead of being left unmapped.
    pub(crate) fallback_on_detach: bool,
    /// The outputs to attach at startup.
    pub(crate) outputs: Vec<OutputSpec>,
}

const fn no_checks(_: &TrixieConfig) -> Result<()> {
    Ok(())
}

/// A constant signifying no user-defined checks are required.
///
/// Pass this into `TrixieConfig::validate` if you have no additional
/// validation checks to run on your config.
pub const NO_CHECKS: fn(&TrixieConfig) -> Result<()> = no_checks;

impl TrixieConfig {
    /// Returns the default construction.
    pub fn new() -> Self {
        let ret = Self::default();
        ret.validate(NO_CHECKS).unwrap();
        ret
    }

    /// Returns a [`TrixieConfigBuilder`] to build your config with the
    /// 'builder' idiom.
    pub fn builder() -> TrixieConfigBuilder {
        TrixieConfigBuilder::new()
    }

    /// Checks the configuration to verify that all invariants are upheld.
    ///
    /// If you have no additional code you want to run, pass in the
    /// [`NO_CHECKS`] constant.
    pub fn validate<F>(&self, checks: F) -> Result<()>
    where
        F: FnOnce(&TrixieConfig) -> Result<()>,
    {
        if self.max_clients < 1 {
            return Err(InvalidConfig("max_clients must be at least 1".into()));
        }
        if self.collect_budget < 1 {
            return Err(InvalidConfig("collect_budget must be at least 1".into()));
        }
        for (i, spec) in self.outputs.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(InvalidConfig(format!("output {i} has an empty name")));
            }
            if self.outputs[..i].iter().any(|o| o.name == spec.name) {
                return Err(InvalidConfig(format!(
                    "output name {:?} is not unique",
                    spec.name
                )));
            }
            if spec.mode.size.is_empty() {
                return Err(InvalidConfig(format!(
                    "output {:?} has a degenerate mode {}",
                    spec.name, spec.mode.size
                )));
            }
            if spec.scale <= 0.0 {
                return Err(InvalidConfig(format!(
                    "output {:?} has a non-positive scale",
                    spec.name
                )));
            }
        }
        checks(self)?;
        Ok(())
    }

    /// The maximum number of simultaneously connected clients.
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// The client unresponsiveness timeout, if enabled.
    pub fn client_timeout(&self) -> Option<Duration> {
        self.client_timeout
    }

    /// The commit-batching budget, in ticks.
    pub fn collect_budget(&self) -> u32 {
        self.collect_budget
    }

    /// Whether detach reassigns orphaned surfaces to a fallback output.
    pub fn fallback_on_detach(&self) -> bool {
        self.fallback_on_detach
    }

    /// The outputs attached at startup.
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }
}

impl Default for TrixieConfig {
    fn default() -> TrixieConfig {
        TrixieConfig {
            max_clients: 64,
            client_timeout: Some(Duration::from_secs(30)),
            collect_budget: 1,
            fallback_on_detach: true,
            outputs: vec![OutputSpec::new(
                "VIRT-1",
                OutputMode::new(1920, 1080, 60_000),
                1.0,
                Point::zeroed(),
            )],
        }
    }
}

/// A helper type to construct a [`TrixieConfig`].
#[derive(Debug, Default)]
pub struct TrixieConfigBuilder {
    inner: TrixieConfig,
}

impl TrixieConfigBuilder {
    /// Creates a new `TrixieConfigBuilder`.
    pub fn new() -> Self {
        Self {
            inner: TrixieConfig::default(),
        }
    }

    /// Sets the maximum number of simultaneously connected clients.
    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.inner.max_clients = max_clients;
        self
    }

    /// Sets the client unresponsiveness timeout. `None` disables the
    /// idle sweep entirely.
    pub fn client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inner.client_timeout = timeout;
        self
    }

    /// Sets how many ticks an output batches commits before composing.
    pub fn collect_budget(mut self, ticks: u32) -> Self {
        self.inner.collect_budget = ticks;
        self
    }

    /// Sets whether detach reassigns orphaned surfaces to a fallback
    /// output.
    pub fn fallback_on_detach(mut self, fallback: bool) -> Self {
        self.inner.fallback_on_detach = fallback;
        self
    }

    /// Sets the outputs attached at startup.
    pub fn outputs<O>(mut self, outputs: O) -> Self
    where
        O: IntoIterator<Item = OutputSpec>,
    {
        self.inner.outputs = outputs.into_iter().collect();
        self
    }

    /// Finishes config construction, validates it and returns a
    /// completed config if validation is successful.
    ///
    /// You can supply an additional `check` to run additional code to
    /// validate your config.
    pub fn finish<F>(self, check: F) -> Result<TrixieConfig>
    where
        F: FnOnce(&TrixieConfig) -> Result<()>,
    {
        let config = self.inner;
        config.validate(check)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        TrixieConfig::new().validate(NO_CHECKS).unwrap();
    }

    #[test]
    fn test_builder_rejects_duplicate_output_names() {
        let mode = OutputMode::new(800, 600, 60_000);
        let err = TrixieConfig::builder()
            .outputs(vec![
                OutputSpec::new("VIRT-1", mode, 1.0, Point::zeroed()),
                OutputSpec::new("VIRT-1", mode, 1.0, Point::new(800, 0)),
            ])
            .finish(NO_CHECKS)
            .unwrap_err();

        assert!(matches!(err, InvalidConfig(_)));
    }

    #[test]
    fn test_builder_rejects_zero_budget() {
        let err = TrixieConfig::builder()
            .collect_budget(0)
            .finish(NO_CHECKS)
            .unwrap_err();
        assert!(matches!(err, InvalidConfig(_)));
    }

    #[test]
    fn test_user_checks_run_after_builtin() {
        let res = TrixieConfig::builder().max_clients(2).finish(|cfg| {
            if cfg.max_clients() < 4 {
                Err(InvalidConfig("need at least 4 client slots".into()))
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
    }
}
