// Engine configuration
//
// Settings that shape how images are turned into network input. Built with
// the same `with_*` chain as the accelerator settings, or read from a JSON
// object whose absent keys keep their defaults.

use deepbelief_core::{Error, Result};

/// Edge length, in pixels, of the crop fed to the first layer.
pub const DEFAULT_IMAGE_SIZE: usize = 227;
/// Edge length images are rescaled to before cropping.
pub const DEFAULT_RESCALED_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Crop size fed to the first layer.
    pub image_size: usize,
    /// Size of the square the input is rescaled to; a root `input_size`
    /// entry in the graph overrides it.
    pub rescaled_size: usize,
    /// Classify ten crops (centre, corners, and their mirrors) and average.
    pub multi_sample: bool,
    /// Take the single crop at a random offset instead of the centre.
    /// Ignored when `multi_sample` is set.
    pub random_sample: bool,
    /// Flip the input vertically while rescaling.
    pub flip_input: bool,
    /// The mean image is stored (channel, row, column) instead of channels-last.
    pub mean_is_channel_major: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            rescaled_size: DEFAULT_RESCALED_SIZE,
            multi_sample: false,
            random_sample: false,
            flip_input: false,
            mean_is_channel_major: false,
        }
    }
}

impl EngineConfig {
    pub fn with_image_size(mut self, size: usize) -> Self {
        self.image_size = size;
        self
    }

    pub fn with_rescaled_size(mut self, size: usize) -> Self {
        self.rescaled_size = size;
        self
    }

    pub fn with_multi_sample(mut self, multi_sample: bool) -> Self {
        self.multi_sample = multi_sample;
        self
    }

    pub fn with_random_sample(mut self, random_sample: bool) -> Self {
        self.random_sample = random_sample;
        self
    }

    pub fn with_flip_input(mut self, flip: bool) -> Self {
        self.flip_input = flip;
        self
    }

    pub fn with_mean_channel_major(mut self, channel_major: bool) -> Self {
        self.mean_is_channel_major = channel_major;
        self
    }

    /// Read overrides from a JSON object.
    ///
    /// ```
    /// use deepbelief::EngineConfig;
    /// let config = EngineConfig::from_json_str(r#"{"multi_sample": true}"#).unwrap();
    /// assert!(config.multi_sample);
    /// assert_eq!(config.image_size, 227);
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::msg(format!("invalid engine config: {e}")))?;
        let Some(object) = value.as_object() else {
            return Err(Error::msg("engine config must be a JSON object"));
        };
        let mut config = EngineConfig::default();
        let size = |key: &str| -> Result<Option<usize>> {
            match object.get(key) {
                None => Ok(None),
                Some(v) => v
                    .as_u64()
                    .filter(|&s| s > 0)
                    .map(|s| Some(s as usize))
                    .ok_or_else(|| Error::msg(format!("{key} must be a positive integer"))),
            }
        };
        let flag = |key: &str| -> Result<Option<bool>> {
            match object.get(key) {
                None => Ok(None),
                Some(v) => v
                    .as_bool()
                    .map(Some)
                    .ok_or_else(|| Error::msg(format!("{key} must be a boolean"))),
            }
        };
        if let Some(v) = size("image_size")? {
            config.image_size = v;
        }
        if let Some(v) = size("rescaled_size")? {
            config.rescaled_size = v;
        }
        if let Some(v) = flag("multi_sample")? {
            config.multi_sample = v;
        }
        if let Some(v) = flag("random_sample")? {
            config.random_sample = v;
        }
        if let Some(v) = flag("flip_input")? {
            config.flip_input = v;
        }
        if let Some(v) = flag("mean_is_channel_major")? {
            config.mean_is_channel_major = v;
        }
        Ok(config)
    }
}
