use std::fmt;
use thiserror::Error;

/// Pipeline stage that produced a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    RegionSelection,
    Acquisition,
    Reprojection,
    Derivation,
    Conversion,
    Reduction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::RegionSelection => "region selection",
            Stage::Acquisition => "acquisition",
            Stage::Reprojection => "reprojection",
            Stage::Derivation => "NPP8 derivation",
            Stage::Conversion => "biomass conversion",
            Stage::Reduction => "region reduction",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BiomassError {
    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Raster {0} has no usable time_start")]
    MissingMetadata(String),

    #[error("Band '{0}' not found")]
    BandNotFound(String),

    #[error("Band schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Raster grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Band shape {found:?} does not match grid {expected:?}")]
    InvalidDimensions {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("CRS error: {0}")]
    CrsError(String),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(String),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<BiomassError>,
    },
}

impl BiomassError {
    /// Stage responsible for the failure, if it was raised inside the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BiomassError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BiomassError>;

/// Tags an error with the pipeline stage it came from.
pub trait StageContext<T> {
    fn at_stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn at_stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| match e {
            // keep the innermost stage
            tagged @ BiomassError::Stage { .. } => tagged,
            other => BiomassError::Stage {
                stage,
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping() {
        let result: Result<()> = Err(BiomassError::Configuration("bad".into()));
        let err = result.at_stage(Stage::RegionSelection).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::RegionSelection));
        assert_eq!(
            err.to_string(),
            "region selection failed: Configuration error: bad"
        );
    }

    #[test]
    fn test_stage_not_rewrapped() {
        let result: Result<()> = Err(BiomassError::BandNotFound("Gpp".into()));
        let err = result
            .at_stage(Stage::Derivation)
            .at_stage(Stage::Conversion)
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Derivation));
    }
}
