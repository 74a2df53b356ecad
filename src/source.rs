use crate::error::{BiomassError, Result};
use crate::raster::RasterSeries;
use crate::temporal::TimeWindow;
use std::collections::HashMap;

/// Collection of 8-day gross primary productivity rasters.
pub const GPP_8DAY: &str = "gross-productivity-8day";
/// Collection of annual net primary productivity rasters.
pub const NPP_ANNUAL: &str = "net-productivity-annual";

/// Provider of time-stamped raster collections.
///
/// Implementations own retrieval (files, remote catalogues); the pipeline
/// only asks for a collection restricted to an inclusive date window.
pub trait RasterSource {
    fn fetch(&self, collection: &str, window: &TimeWindow) -> Result<RasterSeries>;
}

/// Collections held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    collections: HashMap<String, RasterSeries>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: impl Into<String>, series: RasterSeries) -> Self {
        self.collections.insert(name.into(), series);
        self
    }
}

impl RasterSource for MemorySource {
    fn fetch(&self, collection: &str, window: &TimeWindow) -> Result<RasterSeries> {
        self.collections
            .get(collection)
            .map(|series| series.filter_window(window))
            .ok_or_else(|| {
                BiomassError::Configuration(format!("unknown raster collection '{}'", collection))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GridSpec, Raster};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_memory_source_filters_window() {
        let grid = GridSpec::north_up("EPSG:4326", 0.0, 1.0, 0.5, 2, 2).unwrap();
        let rasters = [2022, 2023, 2024, 2025]
            .iter()
            .map(|y| {
                Raster::filled(grid.clone(), "Npp", Some(1.0))
                    .with_time_start(Utc.with_ymd_and_hms(*y, 1, 1, 0, 0, 0).unwrap())
            })
            .collect();
        let source = MemorySource::new()
            .with_collection(NPP_ANNUAL, RasterSeries::from_rasters(rasters).unwrap());

        let window = TimeWindow::years(2023, 2024).unwrap();
        assert_eq!(source.fetch(NPP_ANNUAL, &window).unwrap().len(), 2);
        assert!(source.fetch(GPP_8DAY, &window).is_err());
    }
}
