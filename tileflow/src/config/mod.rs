//! Process configuration snapshot and environment settings.
//!
//! Values arrive pre-parsed from an external configuration loader; this
//! module validates them into an immutable [`ProcessConfig`] snapshot.
//! Configuration errors are fatal and detected before any task runs.

use crate::pyramid::{Bounds, GridType, PyramidError, TilePyramid};
use crate::zoom::{ZoomError, ZoomLevels};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Errors raised while validating process configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid pyramid parameters.
    #[error(transparent)]
    Pyramid(#[from] PyramidError),

    /// Invalid zoom range or zoom-conditioned value.
    #[error(transparent)]
    Zoom(#[from] ZoomError),

    /// `process_zoom` combined with `process_minzoom`/`process_maxzoom`.
    #[error("process_zoom cannot be combined with process_minzoom/process_maxzoom")]
    AmbiguousZoomSpec,

    /// Neither `process_zoom` nor a complete min/max pair given.
    #[error("no zoom levels configured, set process_zoom or process_minzoom/process_maxzoom")]
    MissingZoomSpec,

    /// Baselevel range leaves the process zoom range.
    #[error("baselevels {baselevels} outside of process zoom range {zoom_levels}")]
    BaselevelsOutsideZoomRange {
        baselevels: ZoomLevels,
        zoom_levels: ZoomLevels,
    },

    /// Resampling method name not recognized.
    #[error("unknown resampling method {0:?}")]
    UnknownResampling(String),

    /// No output driver registered under the identifier.
    #[error("no output driver registered for {0:?}")]
    UnknownDriver(String),
}

// =============================================================================
// Resampling
// =============================================================================

/// Resampling method used when interpolating tiles between zoom levels.
///
/// The scheduler only transports the method name to the task body; the
/// actual resampling is performed by the format drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
}

impl Resampling {
    /// Parses a lowercase resampling name.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "cubic" => Ok(Self::Cubic),
            "cubic_spline" => Ok(Self::CubicSpline),
            "lanczos" => Ok(Self::Lanczos),
            "average" => Ok(Self::Average),
            "mode" => Ok(Self::Mode),
            other => Err(ConfigError::UnknownResampling(other.to_string())),
        }
    }

    /// The lowercase name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::CubicSpline => "cubic_spline",
            Self::Lanczos => "lanczos",
            Self::Average => "average",
            Self::Mode => "mode",
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Baselevels
// =============================================================================

/// Baselevel configuration: the zoom range computed directly from inputs.
///
/// Zooms below the range are derived by resampling zoom+1 output with the
/// `lower` method; zooms above by resampling zoom-1 output with `higher`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaselevelsConfig {
    pub levels: ZoomLevels,
    pub lower: Resampling,
    pub higher: Resampling,
}

// =============================================================================
// Raw / validated process configuration
// =============================================================================

/// Raw process configuration fields as delivered by the config loader.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawProcessConfig {
    pub process_zoom: Option<u8>,
    pub process_minzoom: Option<u8>,
    pub process_maxzoom: Option<u8>,
    pub process_bounds: Option<[f64; 4]>,
    #[serde(default = "default_metatiling")]
    pub metatiling: u32,
    #[serde(default)]
    pub pixelbuffer: u32,
    pub baselevels: Option<RawBaselevels>,
}

fn default_metatiling() -> u32 {
    1
}

/// Raw baselevel block with textual resampling names.
#[derive(Clone, Debug, Deserialize)]
pub struct RawBaselevels {
    pub min: u8,
    pub max: u8,
    #[serde(default = "default_lower")]
    pub lower: String,
    #[serde(default = "default_higher")]
    pub higher: String,
}

fn default_lower() -> String {
    "bilinear".to_string()
}

fn default_higher() -> String {
    "nearest".to_string()
}

/// Validated, immutable process configuration snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessConfig {
    pub zoom_levels: ZoomLevels,
    pub bounds: Option<Bounds>,
    pub metatiling: u32,
    pub pixelbuffer: u32,
    pub baselevels: Option<BaselevelsConfig>,
}

impl ProcessConfig {
    /// Validates raw configuration into a snapshot.
    ///
    /// # Errors
    ///
    /// `ConfigError` on an ambiguous or missing zoom specification, inverted
    /// ranges, a baselevel range outside the process zoom range, or an
    /// unknown resampling name.
    pub fn from_raw(raw: RawProcessConfig) -> Result<Self, ConfigError> {
        let zoom_levels = match (raw.process_zoom, raw.process_minzoom, raw.process_maxzoom) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::AmbiguousZoomSpec)
            }
            (Some(zoom), None, None) => ZoomLevels::from_single(zoom),
            (None, Some(min), Some(max)) => ZoomLevels::new(min, max)?,
            _ => return Err(ConfigError::MissingZoomSpec),
        };

        let baselevels = raw
            .baselevels
            .map(|raw| -> Result<BaselevelsConfig, ConfigError> {
                let levels = ZoomLevels::new(raw.min, raw.max)?;
                if !zoom_levels.contains_range(&levels) {
                    return Err(ConfigError::BaselevelsOutsideZoomRange {
                        baselevels: levels,
                        zoom_levels,
                    });
                }
                Ok(BaselevelsConfig {
                    levels,
                    lower: Resampling::from_name(&raw.lower)?,
                    higher: Resampling::from_name(&raw.higher)?,
                })
            })
            .transpose()?;

        Ok(Self {
            zoom_levels,
            bounds: raw.process_bounds.map(Bounds::from),
            metatiling: raw.metatiling,
            pixelbuffer: raw.pixelbuffer,
            baselevels,
        })
    }

    /// Builds the tile pyramid for this configuration.
    pub fn pyramid(&self, grid: GridType) -> Result<TilePyramid, ConfigError> {
        Ok(TilePyramid::new(grid, self.metatiling, self.pixelbuffer)?)
    }
}

// =============================================================================
// Environment settings
// =============================================================================

/// Environment variable holding the IO retry attempt count.
pub const ENV_IO_RETRY_TRIES: &str = "TILEFLOW_IO_RETRY_TRIES";
/// Environment variable holding the IO retry base delay in seconds.
pub const ENV_IO_RETRY_DELAY: &str = "TILEFLOW_IO_RETRY_DELAY";
/// Environment variable holding the IO retry backoff multiplier.
pub const ENV_IO_RETRY_BACKOFF: &str = "TILEFLOW_IO_RETRY_BACKOFF";

/// Retry tuning for collaborator IO calls.
///
/// The remote-future timeout of the cluster executor deliberately has no
/// counterpart here; it must be set explicitly on the executor config.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IoRetrySettings {
    /// Attempts including the initial one (default 3).
    pub tries: u32,
    /// Delay before the first retry (default 1 s).
    pub delay: Duration,
    /// Multiplier applied to the delay after each attempt (default 1.0).
    pub backoff: f64,
}

impl Default for IoRetrySettings {
    fn default() -> Self {
        Self {
            tries: 3,
            delay: Duration::from_secs(1),
            backoff: 1.0,
        }
    }
}

impl IoRetrySettings {
    /// Reads settings from the environment, falling back to defaults.
    ///
    /// Unparseable values are ignored with a warning rather than failing the
    /// whole process.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tries: env_parsed(ENV_IO_RETRY_TRIES).unwrap_or(defaults.tries),
            delay: env_parsed::<f64>(ENV_IO_RETRY_DELAY)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.delay),
            backoff: env_parsed(ENV_IO_RETRY_BACKOFF).unwrap_or(defaults.backoff),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}
