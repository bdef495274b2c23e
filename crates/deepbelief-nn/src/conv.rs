// Conv & GroupedConv — convolution over channels-last images
//
// Conv lowers convolution onto GEMM:
//
//   1. pad the input by `padding` zeros on every side
//   2. unroll every K x K patch at stride S into one row
//      (N, H, W, C) -> (N * P, K * K * C), P = outH * outW
//   3. multiply by the kernel matrix (K * K * C, kernelCount)
//   4. add the per-kernel bias
//
// PARAMETER SHAPES:
//
//   kernels: [K * K * C, kernelCount]   rows ordered [ky][kx][c]
//   bias:    [kernelCount]              (optional)
//
// OUTPUT SIZE FORMULA:
//
//   H_out = ceil((H + 2 * padding - K) / S) + 1
//
// Patches hanging over the bottom or right edge read zeros.
//
// GroupedConv splits the channels into G equal contiguous ranges, runs each
// through its own sub-layer and joins the results along channels in group
// order.

use deepbelief_core::format::{buffer_from_tag, buffer_to_tag};
use deepbelief_core::{bail, Backend, Buffer, Dimensions, Error, Operand, Result, Tag};
use deepbelief_cpu::conv_output_size;

use crate::layer::{header, tensor_bits, Layer};
use crate::module::Module;

/// Convolution layer.
#[derive(Debug, Clone)]
pub struct Conv {
    name: String,
    kernel_count: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    kernels: Buffer,
    bias: Option<Buffer>,
}

impl Conv {
    /// Build from a kernel matrix of shape (K * K * C, kernelCount).
    pub fn new(
        name: impl Into<String>,
        kernels: Buffer,
        bias: Option<Buffer>,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let (values_per_kernel, kernel_count) = kernels.dims().as_matrix()?;
        if kernel_size == 0 || stride == 0 {
            bail!("conv kernel size and stride must be positive (got {kernel_size} and {stride})");
        }
        if values_per_kernel % (kernel_size * kernel_size) != 0 {
            bail!(
                "conv kernels have {values_per_kernel} rows, not a multiple of {kernel_size}x{kernel_size}"
            );
        }
        if let Some(bias) = &bias {
            if bias.element_count() != kernel_count {
                return Err(Error::ShapeMismatch {
                    expected: kernel_count.into(),
                    got: bias.dims().clone(),
                });
            }
        }
        Ok(Conv {
            name: name.into(),
            kernel_count,
            kernel_size,
            stride,
            padding,
            kernels,
            bias,
        })
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        let spec = tag.require("spec")?;
        let kernel_count = spec.require_usize("num_kernels")?;
        let kernels = buffer_from_tag(tag.require("kernels")?)?.with_name("kernels");
        let bias = if tag.require_u32("has_bias")? != 0 {
            Some(buffer_from_tag(tag.require("bias")?)?.with_name("bias"))
        } else {
            None
        };
        let conv = Conv::new(
            tag.require_str("name")?,
            kernels,
            bias,
            spec.require_usize("ksize")?,
            spec.require_usize("stride")?,
            tag.require_usize("padding")?,
        )?;
        if conv.kernel_count != kernel_count {
            return Err(Error::ShapeMismatch {
                expected: Dimensions::from((conv.kernels.dims().size(0)?, kernel_count)),
                got: conv.kernels.dims().clone(),
            });
        }
        Ok(conv)
    }

    pub fn to_tag(&self, weight_bits: Option<u32>) -> Result<Tag<'static>> {
        let spec = Tag::dict([
            ("num_kernels", Tag::Uint(self.kernel_count as u32)),
            ("ksize", Tag::Uint(self.kernel_size as u32)),
            ("stride", Tag::Uint(self.stride as u32)),
        ]);
        let mut entries = header("conv", &self.name);
        entries.push(("spec", spec));
        entries.push((
            "kernels",
            buffer_to_tag(&self.kernels, tensor_bits(&self.kernels, weight_bits)?)?,
        ));
        entries.push(("has_bias", Tag::Uint(self.bias.is_some() as u32)));
        if let Some(bias) = &self.bias {
            entries.push(("bias", buffer_to_tag(bias, 32)?));
        }
        entries.push(("padding", Tag::Uint(self.padding as u32)));
        Ok(Tag::dict(entries))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel_count(&self) -> usize {
        self.kernel_count
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn kernels(&self) -> &Buffer {
        &self.kernels
    }

    pub fn bias(&self) -> Option<&Buffer> {
        self.bias.as_ref()
    }

    pub fn describe(&self) -> String {
        format!(
            "kernel_size={}, kernel_count={}, padding={}, stride={}, kernels={}, bias={}",
            self.kernel_size,
            self.kernel_count,
            self.padding,
            self.stride,
            self.kernels.dims(),
            self.bias
                .as_ref()
                .map_or_else(|| "none".to_string(), |b| b.dims().to_string()),
        )
    }
}

impl<B: Backend + ?Sized> Module<B> for Conv {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        let (count, _, _, channels) = input.dims().as_image()?;
        let expected = Dimensions::from((
            self.kernel_size * self.kernel_size * channels,
            self.kernel_count,
        ));
        if self.kernels.dims() != &expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: self.kernels.dims().clone(),
            });
        }

        let padded = if self.padding == 0 {
            input.view()
        } else {
            backend.insert_margin(input, self.padding, 0.0)?
        };
        let (_, height, width, _) = padded.dims().as_image()?;
        let out_h = conv_output_size(height, self.kernel_size, self.stride)?;
        let out_w = conv_output_size(width, self.kernel_size, self.stride)?;

        let patches = backend.patches_into_rows(&padded, self.kernel_size, self.stride)?;
        let rows = Operand::with_shape(&patches, count * out_h * out_w, expected.size(0)?)?;
        let mut output = backend.gemm(1.0, &rows, &Operand::matrix(&self.kernels)?, 0.0, None)?;
        output.reshape([count, out_h, out_w, self.kernel_count])?;
        if let Some(bias) = &self.bias {
            output = backend.add_bias(&output, bias)?;
        }
        Ok(output.with_name(&self.name))
    }

    fn weights(&self) -> Vec<&Buffer> {
        std::iter::once(&self.kernels).chain(self.bias.as_ref()).collect()
    }
}

/// Grouped convolution: one sub-layer per contiguous channel range.
#[derive(Debug, Clone)]
pub struct GroupedConv {
    name: String,
    groups: Vec<Layer>,
    kernels_count: usize,
}

impl GroupedConv {
    pub fn new(name: impl Into<String>, groups: Vec<Layer>, kernels_count: usize) -> Result<Self> {
        if groups.is_empty() {
            bail!("grouped conv needs at least one group");
        }
        Ok(GroupedConv {
            name: name.into(),
            groups,
            kernels_count,
        })
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        let declared = tag.require_usize("layers_count")?;
        let groups = tag
            .require_list("layers")?
            .iter()
            .map(Layer::from_tag)
            .collect::<Result<Vec<_>>>()?;
        if groups.len() != declared {
            return Err(Error::malformed(
                0,
                format!("gconv declares {declared} layers but lists {}", groups.len()),
            ));
        }
        GroupedConv::new(tag.require_str("name")?, groups, tag.require_usize("kernels_count")?)
    }

    pub fn to_tag(&self, weight_bits: Option<u32>) -> Result<Tag<'static>> {
        let layers = self
            .groups
            .iter()
            .map(|g| g.to_tag(weight_bits))
            .collect::<Result<Vec<_>>>()?;
        let mut entries = header("gconv", &self.name);
        entries.push(("layers_count", Tag::Uint(self.groups.len() as u32)));
        entries.push(("layers", Tag::List(layers)));
        entries.push(("kernels_count", Tag::Uint(self.kernels_count as u32)));
        Ok(Tag::dict(entries))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[Layer] {
        &self.groups
    }

    pub fn kernels_count(&self) -> usize {
        self.kernels_count
    }

    pub fn describe(&self) -> String {
        let inner: Vec<String> = self.groups.iter().map(Layer::describe).collect();
        format!(
            "groups={}, kernels_count={} [{}]",
            self.groups.len(),
            self.kernels_count,
            inner.join("; ")
        )
    }
}

impl<B: Backend + ?Sized> Module<B> for GroupedConv {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        let (_, _, _, channels) = input.dims().as_image()?;
        let group_count = self.groups.len();
        if channels % group_count != 0 {
            bail!("{channels} input channels do not split into {group_count} groups");
        }
        let per_group = channels / group_count;
        let outputs = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let part = backend.extract_channels(input, i * per_group, per_group)?;
                group.forward(backend, &part)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(backend.join_channels(&outputs)?.with_name(&self.name))
    }

    fn weights(&self) -> Vec<&Buffer> {
        self.groups
            .iter()
            .flat_map(|g| Module::<B>::weights(g))
            .collect()
    }
}
