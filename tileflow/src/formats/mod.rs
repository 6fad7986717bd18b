//! Static output-driver registry.
//!
//! Format drivers (GeoTIFF, PNG, tile directories, ...) live outside the
//! core; the registry only maps a format identifier to a registered driver
//! instance. Registration is explicit and happens at startup; there is no
//! runtime introspection or plugin discovery.

use crate::config::ConfigError;
use crate::pyramid::Tile;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Capability surface of an output format driver.
///
/// The concrete encode/decode logic stays with the driver; the core only
/// needs to name it and derive storage targets from tiles.
pub trait OutputDriver: std::fmt::Debug + Send + Sync + 'static {
    /// Identifier the driver is registered under, e.g. `"gtiff"`.
    fn identifier(&self) -> &str;

    /// File extension of the driver's output, without the dot.
    fn file_extension(&self) -> &str;

    /// Storage target for a tile's output.
    fn tile_target(&self, tile: &Tile) -> String {
        format!(
            "{}/{}/{}.{}",
            tile.zoom,
            tile.row,
            tile.col,
            self.file_extension()
        )
    }
}

/// Registry of output drivers, keyed by format identifier.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<BTreeMap<String, Arc<dyn OutputDriver>>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver under its identifier.
    ///
    /// Registering the same identifier again replaces the earlier driver;
    /// the last registration wins.
    pub fn register(&self, driver: Arc<dyn OutputDriver>) {
        let identifier = driver.identifier().to_string();
        debug!(driver = %identifier, "registering output driver");
        self.drivers.write().insert(identifier, driver);
    }

    /// Looks up a driver by identifier.
    pub fn get(&self, identifier: &str) -> Result<Arc<dyn OutputDriver>, ConfigError> {
        self.drivers
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDriver(identifier.to_string()))
    }

    /// All registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    /// Returns true if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PngDriver;

    impl OutputDriver for PngDriver {
        fn identifier(&self) -> &str {
            "png"
        }

        fn file_extension(&self) -> &str {
            "png"
        }
    }

    #[derive(Debug)]
    struct GtiffDriver;

    impl OutputDriver for GtiffDriver {
        fn identifier(&self) -> &str {
            "gtiff"
        }

        fn file_extension(&self) -> &str {
            "tif"
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(PngDriver));
        registry.register(Arc::new(GtiffDriver));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.identifiers(), vec!["gtiff", "png"]);
        assert_eq!(registry.get("png").unwrap().file_extension(), "png");
    }

    #[test]
    fn test_unknown_driver_is_a_config_error() {
        let registry = DriverRegistry::new();
        assert_eq!(
            registry.get("netcdf").unwrap_err(),
            ConfigError::UnknownDriver("netcdf".to_string())
        );
    }

    #[test]
    fn test_last_registration_wins() {
        #[derive(Debug)]
        struct OtherPng;
        impl OutputDriver for OtherPng {
            fn identifier(&self) -> &str {
                "png"
            }
            fn file_extension(&self) -> &str {
                "png8"
            }
        }

        let registry = DriverRegistry::new();
        registry.register(Arc::new(PngDriver));
        registry.register(Arc::new(OtherPng));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("png").unwrap().file_extension(), "png8");
    }

    #[test]
    fn test_default_tile_target_layout() {
        let driver = GtiffDriver;
        assert_eq!(driver.tile_target(&Tile::new(5, 3, 7)), "5/3/7.tif");
    }
}
