//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

/// Largest work-group the kernels may request.
pub const MAX_WORKGROUP_INVOCATIONS: u32 = 256;

/// Tiling used by the min/max and histogram kernels.
///
/// Each invocation walks one square tile of `pixels_per_tile` pixels on a
/// side; a work-group covers `tiles_per_block x tiles_per_block` tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Tile edge length in pixels.
    pub pixels_per_tile: u32,
    /// Block edge length in tiles (the work-group edge).
    pub tiles_per_block: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            pixels_per_tile: 64,
            tiles_per_block: 16,
        }
    }
}

impl TilingConfig {
    /// Pixels covered by one block edge.
    #[must_use]
    pub fn block_extent(&self) -> u32 {
        self.pixels_per_tile * self.tiles_per_block
    }

    /// Invocations per work-group.
    #[must_use]
    pub fn tiles_per_group(&self) -> u32 {
        self.tiles_per_block * self.tiles_per_block
    }

    /// Work-group grid covering an image of the given extent.
    #[must_use]
    pub fn grid(&self, width: u32, height: u32) -> TileGrid {
        let extent = self.block_extent();
        TileGrid {
            blocks_x: width.max(1).div_ceil(extent),
            blocks_y: height.max(1).div_ceil(extent),
            tiles_per_group: self.tiles_per_group(),
        }
    }
}

/// Dispatch grid produced by [`TilingConfig::grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub blocks_x: u32,
    pub blocks_y: u32,
    pub tiles_per_group: u32,
}

impl TileGrid {
    /// Total number of tiles, including those entirely outside the image.
    #[must_use]
    pub fn tile_count(&self) -> u32 {
        self.blocks_x * self.blocks_y * self.tiles_per_group
    }
}

/// Configuration for a statistics engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reduction tiling.
    pub tiling: TilingConfig,

    /// Number of histogram buckets.
    pub histogram_buckets: u32,

    /// Capacity of the mesh pick results buffer.
    pub max_mesh_picks: u32,

    /// Invocations per mesh pick work-group.
    pub pick_group_size: u32,

    /// Screen-space acceptance radius for point picking, in pixels.
    pub point_pick_radius: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiling: TilingConfig::default(),
            histogram_buckets: 256,
            max_mesh_picks: 500,
            pick_group_size: 128,
            point_pick_radius: 35.0,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the configuration against kernel limits.
    pub fn validate(&self) -> Result<()> {
        let tiling = &self.tiling;
        if tiling.pixels_per_tile == 0 {
            return Err(StatsError::InvalidConfig(
                "pixels_per_tile must be non-zero".into(),
            ));
        }
        if !tiling.tiles_per_block.is_power_of_two() {
            return Err(StatsError::InvalidConfig(format!(
                "tiles_per_block must be a power of two, got {}",
                tiling.tiles_per_block
            )));
        }
        if tiling.tiles_per_group() > MAX_WORKGROUP_INVOCATIONS {
            return Err(StatsError::InvalidConfig(format!(
                "{} tiles per block exceeds {MAX_WORKGROUP_INVOCATIONS} invocations",
                tiling.tiles_per_group()
            )));
        }
        if self.histogram_buckets == 0 {
            return Err(StatsError::InvalidConfig(
                "histogram_buckets must be non-zero".into(),
            ));
        }
        if self.max_mesh_picks == 0 {
            return Err(StatsError::InvalidConfig(
                "max_mesh_picks must be non-zero".into(),
            ));
        }
        if self.pick_group_size == 0 || self.pick_group_size > MAX_WORKGROUP_INVOCATIONS {
            return Err(StatsError::InvalidConfig(format!(
                "pick_group_size must be in 1..={MAX_WORKGROUP_INVOCATIONS}"
            )));
        }
        if !(self.point_pick_radius.is_finite() && self.point_pick_radius > 0.0) {
            return Err(StatsError::InvalidConfig(
                "point_pick_radius must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_grid_rounds_up() {
        let tiling = TilingConfig {
            pixels_per_tile: 4,
            tiles_per_block: 2,
        };
        let grid = tiling.grid(9, 8);
        assert_eq!(grid.blocks_x, 2);
        assert_eq!(grid.blocks_y, 1);
        assert_eq!(grid.tile_count(), 8);

        // A 1x1 image still needs one block.
        assert_eq!(tiling.grid(1, 1).blocks_x, 1);
    }

    #[test]
    fn test_validate_rejects_oversized_groups() {
        let mut config = EngineConfig::default();
        config.tiling.tiles_per_block = 32;
        assert!(config.validate().is_err());

        config.tiling.tiles_per_block = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_config() {
        let config = EngineConfig::from_json_str(r#"{ "histogram_buckets": 64 }"#).unwrap();
        assert_eq!(config.histogram_buckets, 64);
        assert_eq!(config.max_mesh_picks, 500);
        assert_eq!(config.tiling, TilingConfig::default());

        let json = config.to_json_string().unwrap();
        let back = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(back.histogram_buckets, 64);
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        assert!(EngineConfig::from_json_str(r#"{ "point_pick_radius": -1.0 }"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
