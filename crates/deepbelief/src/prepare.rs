// PrepareInput — turn an RGB image into network input
//
//   1. rescale the (H, W, C) image to R x R x 3 with bilinear sampling,
//      flipping it vertically if asked to
//   2. crop an S x S window out of the middle
//   3. subtract the mean image, itself cropped the same way
//
// In multi-sample mode the output holds ten crops instead of one:
//
//   index 0       centre            index 5       centre, mirrored
//   index 1..=4   corners TL TR     index 6..=9   corners, mirrored
//                 BL BR
//
// With random sampling the single crop is taken at an offset drawn
// uniformly from [0, R - S] on each axis instead of the centre.
//
// Mirroring is left to right. Channels beyond the third are ignored and
// missing ones are zero.

use deepbelief_core::{bail, Buffer, Dimensions, Error, Result};
use rand::Rng;
use tracing::debug;

use crate::config::EngineConfig;

/// Colour channels fed to the first layer.
pub const INPUT_CHANNELS: usize = 3;

#[derive(Debug, Clone)]
pub struct PrepareInput {
    mean: Vec<f32>,
    image_size: usize,
    rescaled_size: usize,
    multi_sample: bool,
    random_sample: bool,
    flip: bool,
}

/// Square edge of a mean image holding `count` values over three channels.
fn mean_edge(count: usize) -> Option<usize> {
    if count % INPUT_CHANNELS != 0 {
        return None;
    }
    let pixels = count / INPUT_CHANNELS;
    let edge = (pixels as f64).sqrt().round() as usize;
    (edge * edge == pixels).then_some(edge)
}

impl PrepareInput {
    pub fn new(data_mean: &Buffer, config: &EngineConfig) -> Result<Self> {
        let count = data_mean.element_count();
        let rescaled_size = if count == config.rescaled_size.pow(2) * INPUT_CHANNELS {
            config.rescaled_size
        } else {
            let edge = mean_edge(count).ok_or_else(|| Error::ShapeMismatch {
                expected: Dimensions::from([config.rescaled_size, config.rescaled_size, INPUT_CHANNELS]),
                got: data_mean.dims().clone(),
            })?;
            debug!(
                configured = config.rescaled_size,
                from_mean = edge,
                "rescaled size taken from the mean image"
            );
            edge
        };
        let image_size = config.image_size;
        if image_size == 0 || image_size > rescaled_size {
            bail!("crop size {image_size} does not fit in the rescaled size {rescaled_size}");
        }

        let mean = if config.mean_is_channel_major {
            Buffer::from_vec(
                data_mean.to_f32_vec()?,
                [INPUT_CHANNELS, rescaled_size, rescaled_size],
            )?
            .from_channel_major()?
            .to_f32_vec()?
        } else {
            data_mean.to_f32_vec()?
        };
        let margin = (rescaled_size - image_size) / 2;
        let mean = crop(&mean, rescaled_size, image_size, margin, margin, false);

        Ok(PrepareInput {
            mean,
            image_size,
            rescaled_size,
            multi_sample: config.multi_sample,
            random_sample: config.random_sample,
            flip: config.flip_input,
        })
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn rescaled_size(&self) -> usize {
        self.rescaled_size
    }

    /// Number of crops `run` produces.
    pub fn sample_count(&self) -> usize {
        if self.multi_sample {
            10
        } else {
            1
        }
    }

    /// The mean image after cropping, (S, S, 3).
    pub fn mean(&self) -> Result<Buffer> {
        Buffer::from_slice(&self.mean, [self.image_size, self.image_size, INPUT_CHANNELS])
    }

    /// Build the (samples, S, S, 3) input batch for an (H, W, C) image.
    pub fn run(&self, image: &Buffer) -> Result<Buffer> {
        self.run_with_rng(image, &mut rand::thread_rng())
    }

    /// Like [`run`](Self::run), drawing random crop offsets from `rng`.
    pub fn run_with_rng<R: Rng + ?Sized>(&self, image: &Buffer, rng: &mut R) -> Result<Buffer> {
        let (height, width, channels) = match image.dims().sizes() {
            &[h, w, c] => (h, w, c),
            &[1, h, w, c] => (h, w, c),
            _ => {
                return Err(Error::RankMismatch {
                    expected: 3,
                    got: image.dims().rank(),
                })
            }
        };
        let r = self.rescaled_size;
        let s = self.image_size;
        let rescaled = rescale(
            &image.to_f32_vec()?,
            (height, width, channels),
            r,
            self.flip,
        );

        let delta = r - s;
        let margin = delta / 2;
        let mut crops: Vec<(usize, usize, bool)> = Vec::new();
        if self.multi_sample {
            for mirrored in [false, true] {
                crops.push((margin, margin, mirrored));
                for y in 0..2 {
                    for x in 0..2 {
                        crops.push((x * delta, y * delta, mirrored));
                    }
                }
            }
        } else if self.random_sample {
            let (x, y) = (rng.gen_range(0..=delta), rng.gen_range(0..=delta));
            debug!(x, y, "random crop");
            crops.push((x, y, false));
        } else {
            crops.push((margin, margin, false));
        }

        let mut output = Vec::with_capacity(crops.len() * s * s * INPUT_CHANNELS);
        for (x, y, mirrored) in crops.iter().copied() {
            let sample = crop(&rescaled, r, s, x, y, mirrored);
            output.extend(sample.iter().zip(self.mean.iter()).map(|(v, m)| v - m));
        }
        Ok(Buffer::from_vec(output, [crops.len(), s, s, INPUT_CHANNELS])?.with_name("input"))
    }
}

/// Bilinear rescale of an (H, W, C) image to (size, size, 3).
fn rescale(
    input: &[f32],
    (height, width, channels): (usize, usize, usize),
    size: usize,
    flip: bool,
) -> Vec<f32> {
    let scale_y = height as f32 / size as f32;
    let scale_x = width as f32 / size as f32;
    let written = channels.min(INPUT_CHANNELS);
    let sample = |y: usize, x: usize, c: usize| input[(y * width + x) * channels + c];

    let mut output = vec![0.0f32; size * size * INPUT_CHANNELS];
    for oy in 0..size {
        let row = if flip { size - 1 - oy } else { oy };
        let sy = (oy as f32 * scale_y).min((height - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = sy - y0 as f32;
        for ox in 0..size {
            let sx = (ox as f32 * scale_x).min((width - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = sx - x0 as f32;
            let base = (row * size + ox) * INPUT_CHANNELS;
            for c in 0..written {
                let top = sample(y0, x0, c) * (1.0 - fx) + sample(y0, x1, c) * fx;
                let bottom = sample(y1, x0, c) * (1.0 - fx) + sample(y1, x1, c) * fx;
                output[base + c] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    output
}

/// Copy the `size` x `size` window at (x, y) out of a square
/// (edge, edge, 3) image, optionally mirrored left to right.
fn crop(source: &[f32], edge: usize, size: usize, x: usize, y: usize, mirrored: bool) -> Vec<f32> {
    let mut output = Vec::with_capacity(size * size * INPUT_CHANNELS);
    for dy in 0..size {
        for dx in 0..size {
            let sx = if mirrored { x + size - 1 - dx } else { x + dx };
            let base = ((y + dy) * edge + sx) * INPUT_CHANNELS;
            output.extend_from_slice(&source[base..base + INPUT_CHANNELS]);
        }
    }
    output
}
