use deepbelief_core::{Error, Result};

/// Largest texture edge most substrates accept.
pub const DEFAULT_MAX_TEXTURE_SIZE: usize = 4096;

/// Weight textures kept resident before the least recently used is dropped.
pub const DEFAULT_MAX_CACHED_TEXTURES: usize = 1024;

/// Tunables of the accelerated backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelConfig {
    /// Longest texture edge, in texels. Longer reductions are tiled.
    pub max_texture_size: usize,
    /// Group four values per texel when the operand shapes allow it.
    pub packed_layout: bool,
    /// Read results back as floats instead of RGBA8-encoded bytes.
    pub float_readback: bool,
    /// Upper bound on resident weight textures.
    pub max_cached_textures: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            packed_layout: true,
            float_readback: false,
            max_cached_textures: DEFAULT_MAX_CACHED_TEXTURES,
        }
    }
}

impl AccelConfig {
    pub fn with_max_texture_size(mut self, size: usize) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn with_packed_layout(mut self, packed: bool) -> Self {
        self.packed_layout = packed;
        self
    }

    pub fn with_float_readback(mut self, float_readback: bool) -> Self {
        self.float_readback = float_readback;
        self
    }

    pub fn with_max_cached_textures(mut self, count: usize) -> Self {
        self.max_cached_textures = count;
        self
    }

    /// Read overrides from a JSON object; absent keys keep their defaults.
    ///
    /// ```
    /// use deepbelief_accel::AccelConfig;
    /// let config = AccelConfig::from_json_str(r#"{"max_texture_size": 2048}"#).unwrap();
    /// assert_eq!(config.max_texture_size, 2048);
    /// assert!(config.packed_layout);
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::msg(format!("invalid accelerator config: {e}")))?;
        let Some(object) = value.as_object() else {
            return Err(Error::msg("accelerator config must be a JSON object"));
        };
        let mut config = AccelConfig::default();
        if let Some(v) = object.get("max_texture_size") {
            let size = v
                .as_u64()
                .filter(|&s| s > 0)
                .ok_or_else(|| Error::msg("max_texture_size must be a positive integer"))?;
            config.max_texture_size = size as usize;
        }
        if let Some(v) = object.get("packed_layout") {
            config.packed_layout = v
                .as_bool()
                .ok_or_else(|| Error::msg("packed_layout must be a boolean"))?;
        }
        if let Some(v) = object.get("float_readback") {
            config.float_readback = v
                .as_bool()
                .ok_or_else(|| Error::msg("float_readback must be a boolean"))?;
        }
        if let Some(v) = object.get("max_cached_textures") {
            let count = v
                .as_u64()
                .filter(|&c| c > 0)
                .ok_or_else(|| Error::msg("max_cached_textures must be a positive integer"))?;
            config.max_cached_textures = count as usize;
        }
        Ok(config)
    }
}
