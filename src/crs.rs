use crate::error::{BiomassError, Result};
use log::{debug, info};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Length of one degree of longitude at the equator on the WGS84 ellipsoid.
pub const METERS_PER_DEGREE: f64 = 111_319.490_793_273_57;

/// MODIS sinusoidal grid, as used by the MOD17 products.
pub const MODIS_SINUSOIDAL: &str = "SR-ORG:6974";

// lon/lat pivot for transforms through the sinusoidal grid
const GEOGRAPHIC: &str = "EPSG:4326";

/// Sphere radius of the MODIS sinusoidal grid, in metres.
pub const MODIS_SPHERE_RADIUS: f64 = 6_371_007.181;

fn is_sinusoidal(crs: &str) -> bool {
    crs.trim().eq_ignore_ascii_case(MODIS_SINUSOIDAL)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrsUnits {
    Degrees, // geographic lat/lon
    Meters,  // projected, metric
}

/// Proj string for a supported CRS identifier.
pub fn proj_string(crs: &str) -> Result<String> {
    let normalized = crs.trim().to_ascii_uppercase();
    if is_sinusoidal(&normalized) {
        return Ok(format!(
            "+proj=sinu +lon_0=0 +x_0=0 +y_0=0 +R={} +units=m +no_defs",
            MODIS_SPHERE_RADIUS
        ));
    }

    let code: u32 = normalized
        .strip_prefix("EPSG:")
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| BiomassError::CrsError(format!("unrecognised CRS identifier '{}'", crs)))?;

    match code {
        4326 => Ok("+proj=longlat +datum=WGS84 +no_defs".to_string()),
        3857 => Ok("+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs".to_string()),
        32601..=32660 => Ok(format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            code - 32600
        )),
        32701..=32760 => Ok(format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            code - 32700
        )),
        _ => Err(BiomassError::CrsError(format!("EPSG:{} not supported", code))),
    }
}

/// Linear units of a supported CRS.
pub fn crs_units(crs: &str) -> Result<CrsUnits> {
    let proj = proj_string(crs)?;
    if proj.contains("+proj=longlat") {
        Ok(CrsUnits::Degrees)
    } else {
        Ok(CrsUnits::Meters)
    }
}

/// Ground scale in metres expressed in the units of `crs`.
pub fn resolution_in_crs_units(crs: &str, scale_meters: f64) -> Result<f64> {
    match crs_units(crs)? {
        CrsUnits::Meters => {
            info!("Projected CRS {}: pixel size {} m", crs, scale_meters);
            Ok(scale_meters)
        }
        CrsUnits::Degrees => {
            let degrees = scale_meters / METERS_PER_DEGREE;
            info!(
                "Geographic CRS {}: scale {} m = {:.8} degrees at the equator",
                crs, scale_meters, degrees
            );
            Ok(degrees)
        }
    }
}

/// CRS identifier of a raster from its spatial reference: the authority
/// code when there is one, otherwise the MODIS sinusoidal grid when the
/// proj definition says so. Anything else is rejected rather than guessed.
pub fn identify_crs(authority: Option<(&str, &str)>, proj4: Option<&str>) -> Result<String> {
    if let Some((name, code)) = authority {
        return Ok(format!("{}:{}", name, code));
    }
    match proj4 {
        Some(def) if def.contains("+proj=sinu") => Ok(MODIS_SINUSOIDAL.to_string()),
        Some(def) => Err(BiomassError::CrsError(format!(
            "no authority code for CRS '{}'",
            def.trim()
        ))),
        None => Err(BiomassError::CrsError("raster has no CRS".to_string())),
    }
}

/// Spherical sinusoidal projection of lon/lat degrees.
fn sinusoidal_forward(lon: f64, lat: f64) -> (f64, f64) {
    let (lambda, phi) = (lon.to_radians(), lat.to_radians());
    (MODIS_SPHERE_RADIUS * lambda * phi.cos(), MODIS_SPHERE_RADIUS * phi)
}

/// Inverse of [`sinusoidal_forward`]. Points off the projected ellipse fail.
fn sinusoidal_inverse(x: f64, y: f64) -> Result<(f64, f64)> {
    let phi = y / MODIS_SPHERE_RADIUS;
    let cos_phi = phi.cos();
    if phi.abs() > std::f64::consts::FRAC_PI_2 || cos_phi <= f64::EPSILON {
        return Err(BiomassError::CrsError(format!(
            "({}, {}) is outside the sinusoidal grid",
            x, y
        )));
    }
    let lambda = x / (MODIS_SPHERE_RADIUS * cos_phi);
    if lambda.abs() > std::f64::consts::PI {
        return Err(BiomassError::CrsError(format!(
            "({}, {}) is outside the sinusoidal grid",
            x, y
        )));
    }
    Ok((lambda.to_degrees(), phi.to_degrees()))
}

/// Point transformer between two CRSs.
///
/// `proj4rs` has no sinusoidal projection, so the MODIS grid is handled
/// inline and chained with a lon/lat transform on the other side.
pub enum CoordTransform {
    Identity,
    /// Inverse sinusoidal to lon/lat, then the inner transform.
    FromSinusoidal(Box<CoordTransform>),
    /// Inner transform to lon/lat, then forward sinusoidal.
    ToSinusoidal(Box<CoordTransform>),
    Proj {
        source: Box<Proj>,
        target: Box<Proj>,
        source_geographic: bool,
        target_geographic: bool,
    },
}

impl std::fmt::Debug for CoordTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordTransform::Identity => f.write_str("CoordTransform::Identity"),
            CoordTransform::FromSinusoidal(then) => {
                f.debug_tuple("CoordTransform::FromSinusoidal").field(then).finish()
            }
            CoordTransform::ToSinusoidal(first) => {
                f.debug_tuple("CoordTransform::ToSinusoidal").field(first).finish()
            }
            CoordTransform::Proj {
                source_geographic,
                target_geographic,
                ..
            } => f
                .debug_struct("CoordTransform::Proj")
                .field("source_geographic", source_geographic)
                .field("target_geographic", target_geographic)
                .finish_non_exhaustive(),
        }
    }
}

impl CoordTransform {
    pub fn between(source_crs: &str, target_crs: &str) -> Result<Self> {
        if source_crs.trim().eq_ignore_ascii_case(target_crs.trim()) {
            return Ok(CoordTransform::Identity);
        }
        debug!("Building transform {} -> {}", source_crs, target_crs);

        if is_sinusoidal(source_crs) {
            let then = Self::between(GEOGRAPHIC, target_crs)?;
            return Ok(CoordTransform::FromSinusoidal(Box::new(then)));
        }
        if is_sinusoidal(target_crs) {
            let first = Self::between(source_crs, GEOGRAPHIC)?;
            return Ok(CoordTransform::ToSinusoidal(Box::new(first)));
        }

        let source = Proj::from_proj_string(&proj_string(source_crs)?)
            .map_err(|e| BiomassError::CrsError(format!("{}: {:?}", source_crs, e)))?;
        let target = Proj::from_proj_string(&proj_string(target_crs)?)
            .map_err(|e| BiomassError::CrsError(format!("{}: {:?}", target_crs, e)))?;

        Ok(CoordTransform::Proj {
            source: Box::new(source),
            target: Box::new(target),
            source_geographic: crs_units(source_crs)? == CrsUnits::Degrees,
            target_geographic: crs_units(target_crs)? == CrsUnits::Degrees,
        })
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CoordTransform::Identity)
    }

    /// Transform one point. Geographic coordinates are in degrees.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self {
            CoordTransform::Identity => Ok((x, y)),
            CoordTransform::FromSinusoidal(then) => {
                let (lon, lat) = sinusoidal_inverse(x, y)?;
                then.apply(lon, lat)
            }
            CoordTransform::ToSinusoidal(first) => {
                let (lon, lat) = first.apply(x, y)?;
                Ok(sinusoidal_forward(lon, lat))
            }
            CoordTransform::Proj {
                source,
                target,
                source_geographic,
                target_geographic,
            } => {
                let mut point = if *source_geographic {
                    (x.to_radians(), y.to_radians(), 0.0)
                } else {
                    (x, y, 0.0)
                };
                transform(source, target, &mut point)
                    .map_err(|e| BiomassError::CrsError(format!("transform failed: {:?}", e)))?;
                if *target_geographic {
                    Ok((point.0.to_degrees(), point.1.to_degrees()))
                } else {
                    Ok((point.0, point.1))
                }
            }
        }
    }
}
