// Normalize — local response normalization across channels
//
//   out[c] = in[c] * (k + alpha / N * sum(in[c']^2 for c' in window(c)))^-beta
//
// The window holds N channels centred on c and is clipped at the channel
// bounds.

use deepbelief_core::{bail, Backend, Buffer, ResponseParams, Result, Tag};

use crate::layer::header;
use crate::module::Module;

#[derive(Debug, Clone)]
pub struct Normalize {
    name: String,
    params: ResponseParams,
}

impl Normalize {
    pub fn new(name: impl Into<String>, params: ResponseParams) -> Result<Self> {
        if params.window == 0 {
            bail!("normalization window must hold at least one channel");
        }
        Ok(Normalize {
            name: name.into(),
            params,
        })
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        let params = ResponseParams {
            window: tag.require_usize("size")?,
            k: tag.require_f32("k")?,
            alpha: tag.require_f32("alpha")?,
            beta: tag.require_f32("beta")?,
        };
        Normalize::new(tag.require_str("name")?, params)
    }

    pub fn to_tag(&self) -> Tag<'static> {
        let mut entries = header("normalize", &self.name);
        entries.push(("size", Tag::Uint(self.params.window as u32)));
        entries.push(("k", Tag::Float(self.params.k)));
        entries.push(("alpha", Tag::Float(self.params.alpha)));
        entries.push(("beta", Tag::Float(self.params.beta)));
        Tag::dict(entries)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> ResponseParams {
        self.params
    }

    pub fn describe(&self) -> String {
        let p = &self.params;
        format!("size={}, k={}, alpha={}, beta={}", p.window, p.k, p.alpha, p.beta)
    }
}

impl<B: Backend + ?Sized> Module<B> for Normalize {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        Ok(backend
            .local_response(input, self.params)?
            .with_name(&self.name))
    }
}
