use crate::config::PipelineConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "npp8-biomass")]
#[command(about = "Estimate ground biomass from 8-day GPP and annual NPP rasters")]
#[command(version)]
pub struct Args {
    /// JSON configuration file (command-line options override it)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory of 8-day GPP GeoTIFFs, one file per date
    #[arg(long, value_name = "DIR")]
    pub gpp_dir: PathBuf,

    /// Directory of annual NPP GeoTIFFs, one file per year
    #[arg(long, value_name = "DIR")]
    pub npp_dir: PathBuf,

    /// Vector dataset holding the region boundaries
    #[arg(short, long, value_name = "FILE")]
    pub regions: PathBuf,

    /// First calendar year (inclusive)
    #[arg(long, value_name = "YEAR")]
    pub start_year: Option<i32>,

    /// Last calendar year (inclusive)
    #[arg(long, value_name = "YEAR")]
    pub end_year: Option<i32>,

    /// Target CRS, e.g. EPSG:4326
    #[arg(long, value_name = "CRS")]
    pub crs: Option<String>,

    /// Target ground resolution in meters
    #[arg(short, long, value_name = "METERS")]
    pub scale: Option<f64>,

    /// NPP8 to biomass multiplier
    #[arg(long, value_name = "FACTOR")]
    pub coefficient: Option<f64>,

    /// Integer attribute used to pick the region
    #[arg(long, value_name = "NAME")]
    pub region_attribute: Option<String>,

    /// Value the region attribute must equal
    #[arg(long, value_name = "VALUE")]
    pub region_value: Option<i64>,

    /// Output directory for the time series CSV and exported composite
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Export the mean biomass composite as GeoTIFF
    #[arg(long)]
    pub export: bool,

    /// Compression for the exported GeoTIFF (DEFLATE, LZW, ZSTD, NONE)
    #[arg(long, value_name = "TYPE", default_value = "DEFLATE")]
    pub compression: String,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Overlay the options given on the command line onto `config`.
    pub fn apply_to(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(v) = self.start_year {
            config.start_year = v;
        }
        if let Some(v) = self.end_year {
            config.end_year = v;
        }
        if let Some(v) = &self.crs {
            config.crs = v.clone();
        }
        if let Some(v) = self.scale {
            config.scale = v;
        }
        if let Some(v) = self.coefficient {
            config.coefficient = v;
        }
        if let Some(v) = &self.region_attribute {
            config.region_attribute = v.clone();
        }
        if let Some(v) = self.region_value {
            config.region_value = v;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "npp8-biomass",
            "--gpp-dir",
            "gpp",
            "--npp-dir",
            "npp",
            "-r",
            "regions.gpkg",
            "--start-year",
            "2021",
            "--scale",
            "250",
            "--region-value",
            "12",
        ])
        .unwrap();
        let config = args.apply_to(PipelineConfig::default());
        assert_eq!(config.start_year, 2021);
        assert_eq!(config.end_year, 2024);
        assert_eq!(config.scale, 250.0);
        assert_eq!(config.region_value, 12);
        assert_eq!(args.compression, "DEFLATE");
        assert!(!args.export);
    }

    #[test]
    fn test_requires_inputs() {
        assert!(Args::try_parse_from(["npp8-biomass", "--gpp-dir", "gpp"]).is_err());
    }
}
