// Library exports for testing and reuse

pub mod annual;
pub mod biomass;
pub mod cli;
pub mod config;
pub mod crs;
pub mod error;
#[cfg(feature = "gdal")]
pub mod io;
pub mod npp8;
pub mod output;
pub mod pipeline;
pub mod raster;
pub mod region;
pub mod reproject;
pub mod source;
pub mod temporal;

// Re-export commonly used types
pub use annual::{aggregate, count, Reducer};
pub use biomass::{convert, BIOMASS_BAND};
pub use config::PipelineConfig;
pub use error::{BiomassError, Result, Stage};
pub use npp8::{Npp8Deriver, NPP8_BAND};
pub use pipeline::{Diagnostic, Pipeline, PipelineOutput};
pub use raster::{Band, GridSpec, Pixel, Raster, RasterSeries};
pub use region::{mean_composite, select_region, series_by_region, Feature, Region, SeriesPoint};
pub use source::{MemorySource, RasterSource};
pub use temporal::{year_bounds, year_of, TimeWindow};
