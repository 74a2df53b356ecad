use crate::biomass::{validate_coefficient, DEFAULT_COEFFICIENT};
use crate::crs::CoordTransform;
use crate::error::{BiomassError, Result};
use crate::npp8::{DEFAULT_GPP_BAND, DEFAULT_NPP_BAND};
use crate::source::{GPP_8DAY, NPP_ANNUAL};
use crate::temporal::TimeWindow;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Biomass class boundaries, consumed by presentation and summaries only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassThresholds {
    pub low: (f64, f64),
    pub medium: (f64, f64),
    pub high: (f64, f64),
}

impl Default for ClassThresholds {
    fn default() -> Self {
        Self {
            low: (100.0, 300.0),
            medium: (301.0, 600.0),
            high: (601.0, 800.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum BiomassClass {
    BelowLow,
    Low,
    Medium,
    High,
    AboveHigh,
}

impl ClassThresholds {
    /// Class of a biomass value. Values in the gaps between ranges go to
    /// the lower class.
    pub fn classify(&self, value: f64) -> BiomassClass {
        if value < self.low.0 {
            BiomassClass::BelowLow
        } else if value < self.medium.0 {
            BiomassClass::Low
        } else if value < self.high.0 {
            BiomassClass::Medium
        } else if value <= self.high.1 {
            BiomassClass::High
        } else {
            BiomassClass::AboveHigh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub start_year: i32,
    pub end_year: i32,
    /// Target CRS identifier, e.g. `EPSG:4326`.
    pub crs: String,
    /// Target ground resolution in metres.
    pub scale: f64,
    pub coefficient: f64,
    pub region_attribute: String,
    pub region_value: i64,
    pub gpp_collection: String,
    pub npp_collection: String,
    pub gpp_band: String,
    pub npp_band: String,
    pub thresholds: ClassThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_year: 2023,
            end_year: 2024,
            crs: "EPSG:4326".to_string(),
            scale: 500.0,
            coefficient: DEFAULT_COEFFICIENT,
            region_attribute: "OBJECTID".to_string(),
            region_value: 30,
            gpp_collection: GPP_8DAY.to_string(),
            npp_collection: NPP_ANNUAL.to_string(),
            gpp_band: DEFAULT_GPP_BAND.to_string(),
            npp_band: DEFAULT_NPP_BAND.to_string(),
            thresholds: ClassThresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        info!("Loading configuration: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_year > self.end_year {
            return Err(BiomassError::Configuration(format!(
                "start year {} is after end year {}",
                self.start_year, self.end_year
            )));
        }
        TimeWindow::years(self.start_year, self.end_year)?;
        validate_coefficient(self.coefficient)?;
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(BiomassError::Configuration(format!(
                "scale must be a positive number of metres, got {}",
                self.scale
            )));
        }
        for (what, value) in [
            ("region attribute", &self.region_attribute),
            ("GPP collection", &self.gpp_collection),
            ("NPP collection", &self.npp_collection),
            ("GPP band", &self.gpp_band),
            ("NPP band", &self.npp_band),
        ] {
            if value.trim().is_empty() {
                return Err(BiomassError::Configuration(format!("{} is empty", what)));
            }
        }
        // target must be reachable from lon/lat
        CoordTransform::between("EPSG:4326", &self.crs)
            .map_err(|e| BiomassError::Configuration(format!("target CRS: {}", e)))?;
        Ok(())
    }

    pub fn window(&self) -> Result<TimeWindow> {
        TimeWindow::years(self.start_year, self.end_year)
    }
}
