// Neuron — fully connected layer
//
// Every non-batch dimension of the input is flattened into one feature axis
// and multiplied by the weight matrix:
//
//   y = flatten(x) * W + b
//
// PARAMETER SHAPES:
//
//   weight: [inputSize, outputCount]
//           [outputCount, inputSize] when the weights are stored transposed;
//           the GEMM then reads them through swapped strides
//   bias:   [outputCount]   (optional)
//
// A dropout ratio r > 0 recorded at training time scales the output by
// (1 - r).

use deepbelief_core::format::{buffer_from_tag, buffer_to_tag};
use deepbelief_core::{Backend, Buffer, Dimensions, Error, Operand, Result, Tag};

use crate::layer::{batch_size, header, tensor_bits};
use crate::module::Module;

#[derive(Debug, Clone)]
pub struct Neuron {
    name: String,
    output_count: usize,
    weights: Buffer,
    bias: Option<Buffer>,
    dropout: f32,
    transposed: bool,
}

impl Neuron {
    pub fn new(
        name: impl Into<String>,
        weights: Buffer,
        bias: Option<Buffer>,
        transposed: bool,
    ) -> Result<Self> {
        let (rows, cols) = weights.dims().as_matrix()?;
        let output_count = if transposed { rows } else { cols };
        if let Some(bias) = &bias {
            if bias.element_count() != output_count {
                return Err(Error::ShapeMismatch {
                    expected: output_count.into(),
                    got: bias.dims().clone(),
                });
            }
        }
        Ok(Neuron {
            name: name.into(),
            output_count,
            weights,
            bias,
            dropout: 0.0,
            transposed,
        })
    }

    pub fn with_dropout(mut self, ratio: f32) -> Self {
        self.dropout = ratio;
        self
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        let output_count = tag.require("spec")?.require_usize("num_output")?;
        let weights = buffer_from_tag(tag.require("weight")?)?.with_name("weight");
        let bias = if tag.require_u32("has_bias")? != 0 {
            Some(buffer_from_tag(tag.require("bias")?)?.with_name("bias"))
        } else {
            None
        };
        let transposed = tag.optional_u32("are_weights_transposed")?.unwrap_or(0) != 0;
        let neuron = Neuron::new(tag.require_str("name")?, weights, bias, transposed)?
            .with_dropout(tag.optional_f32("dropout")?.unwrap_or(0.0));
        if neuron.output_count != output_count {
            return Err(Error::ShapeMismatch {
                expected: output_count.into(),
                got: neuron.output_count.into(),
            });
        }
        Ok(neuron)
    }

    pub fn to_tag(&self, weight_bits: Option<u32>) -> Result<Tag<'static>> {
        let mut entries = header("neuron", &self.name);
        entries.push((
            "spec",
            Tag::dict([("num_output", Tag::Uint(self.output_count as u32))]),
        ));
        entries.push((
            "weight",
            buffer_to_tag(&self.weights, tensor_bits(&self.weights, weight_bits)?)?,
        ));
        entries.push(("are_weights_transposed", Tag::Uint(self.transposed as u32)));
        entries.push(("has_bias", Tag::Uint(self.bias.is_some() as u32)));
        if let Some(bias) = &self.bias {
            entries.push(("bias", buffer_to_tag(bias, 32)?));
        }
        entries.push(("dropout", Tag::Float(self.dropout)));
        Ok(Tag::dict(entries))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn weights_buffer(&self) -> &Buffer {
        &self.weights
    }

    pub fn bias(&self) -> Option<&Buffer> {
        self.bias.as_ref()
    }

    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn are_weights_transposed(&self) -> bool {
        self.transposed
    }

    pub fn describe(&self) -> String {
        format!(
            "output_count={}, bias={}, dropout={}, transposed={}, weights={}",
            self.output_count,
            self.bias.is_some(),
            self.dropout,
            self.transposed,
            self.weights.dims()
        )
    }
}

impl<B: Backend + ?Sized> Module<B> for Neuron {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        let count = batch_size(input)?;
        let input_size = input.element_count() / count;

        let expected = if self.transposed {
            Dimensions::from((self.output_count, input_size))
        } else {
            Dimensions::from((input_size, self.output_count))
        };
        if self.weights.dims() != &expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: self.weights.dims().clone(),
            });
        }

        let flat = if input.layout().is_compact() {
            input.view()
        } else {
            input.to_f32()?
        };
        let rows = Operand::with_shape(&flat, count, input_size)?;
        let weights = if self.transposed {
            Operand::matrix(&self.weights)?.transposed()
        } else {
            Operand::matrix(&self.weights)?
        };
        let mut output = backend.gemm(1.0, &rows, &weights, 0.0, None)?;
        if let Some(bias) = &self.bias {
            output = backend.add_bias(&output, bias)?;
        }
        if self.dropout > 0.0 {
            output = backend.scale(&output, 1.0 - self.dropout)?;
        }
        Ok(output.with_name(&self.name))
    }

    fn weights(&self) -> Vec<&Buffer> {
        std::iter::once(&self.weights).chain(self.bias.as_ref()).collect()
    }
}
