//! Per-level frame transformers.
//!
//! Each building level is surveyed separately, so every level carries its own
//! correspondence points and therefore its own fitted [`FrameTransformer`].
//! Robots on the same level share one transformer through an [`Arc`].

use std::collections::HashMap;
use std::sync::Arc;

use fleetbridge_types::FleetError;
use tracing::info;

use crate::transform::{CorrespondencePoint, FrameTransformer};

/// Level name → fitted transformer.
#[derive(Debug, Default, Clone)]
pub struct FrameRegistry {
    levels: HashMap<String, Arc<FrameTransformer>>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit one transformer per level.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Config`] naming the first level whose points
    /// cannot be fitted, wrapping the underlying fit error.
    pub fn from_levels<I, S>(levels: I) -> Result<Self, FleetError>
    where
        I: IntoIterator<Item = (S, Vec<CorrespondencePoint>)>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (level, points) in levels {
            let level = level.into();
            let transformer = FrameTransformer::fit(&points).map_err(|e| {
                FleetError::Config(format!("reference_coordinates.{level}: {e}"))
            })?;
            info!(
                level = %level,
                points = points.len(),
                residual_rms = transformer.residual_rms(),
                "reference coordinates fitted"
            );
            registry.set_level(level, transformer);
        }
        Ok(registry)
    }

    /// Insert or replace the transformer for `level`.
    pub fn set_level(&mut self, level: impl Into<String>, transformer: FrameTransformer) {
        self.levels.insert(level.into(), Arc::new(transformer));
    }

    /// Shared transformer for `level`, if configured.
    pub fn get(&self, level: &str) -> Option<Arc<FrameTransformer>> {
        self.levels.get(level).cloned()
    }

    /// Like [`get`][Self::get] but fails with [`FleetError::Config`].
    pub fn lookup(&self, level: &str) -> Result<Arc<FrameTransformer>, FleetError> {
        self.get(level).ok_or_else(|| {
            FleetError::Config(format!("no reference_coordinates for level '{level}'"))
        })
    }

    /// Configured level names, sorted.
    pub fn levels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.levels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
