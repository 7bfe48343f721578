//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::rc::Rc;

use crate::ErrPack;
use crate::expr::{Expr, ToExpr};
use crate::monitor::Monitor;
use crate::random::RandomStreams;
use crate::shared::SharedVar;
use crate::tensor;
use crate::util::cold_path;

use super::{Activation, Model, ModelError, Reconstruct};

//--------------------------------------------------------------------------------------------------

struct Weights {
	weights: Rc<SharedVar>,         // shape: [nvis, nhid]
	visbias: Rc<SharedVar>,         // shape: [nvis]
	w_prime: Option<Rc<SharedVar>>, // shape: [nhid, nvis], only when untied
}

/// One layer pair of a denoising autoencoder.
///
/// When created with `nvis == 0`, the visible side is not allocated until
/// `set_visible_size()` is called.
pub struct Autoencoder {
	nvis: usize,
	nhid: usize,
	act_enc: Activation,
	act_dec: Activation,
	tied_weights: bool,
	irange: f64,
	streams: Rc<RandomStreams>,

	hidbias: Rc<SharedVar>, // shape: [nhid]
	weights: Option<Weights>,
	monitor: Option<Monitor>,
}

impl Autoencoder {
	pub fn new(
		nvis: usize,
		nhid: usize,
		act_enc: Activation,
		act_dec: Activation,
		tied_weights: bool,
		irange: f64,
		streams: Rc<RandomStreams>,
	) -> Self {
		let mut ae = Self {
			nvis: 0,
			nhid,
			act_enc,
			act_dec,
			tied_weights,
			irange,
			streams,
			hidbias: SharedVar::new("hb", tensor::zeros(&[nhid])),
			weights: None,
			monitor: None,
		};
		if nvis > 0 {
			ae.set_visible_size(nvis);
		}
		ae
	}

	/// Allocates the visible side. Any previous weights are replaced.
	pub fn set_visible_size(&mut self, nvis: usize) {
		let weights = self.streams.uniform(&[nvis, self.nhid], self.irange);
		let w_prime = if self.tied_weights {
			None
		} else {
			let w_prime = self.streams.uniform(&[self.nhid, nvis], self.irange);
			Some(SharedVar::new("Wprime", w_prime))
		};
		self.nvis = nvis;
		self.weights = Some(Weights {
			weights: SharedVar::new("W", weights),
			visbias: SharedVar::new("vb", tensor::zeros(&[nvis])),
			w_prime,
		});
	}

	pub fn nvis(&self) -> usize {
		self.nvis
	}

	pub fn nhid(&self) -> usize {
		self.nhid
	}

	pub fn act_enc(&self) -> Activation {
		self.act_enc
	}

	pub fn act_dec(&self) -> Activation {
		self.act_dec
	}

	pub fn tied_weights(&self) -> bool {
		self.tied_weights
	}

	pub fn has_weights(&self) -> bool {
		self.weights.is_some()
	}

	fn allocated(&self) -> Result<&Weights, ErrPack<ModelError>> {
		self.weights.as_ref().ok_or_else(|| {
			cold_path();
			ErrPack::with_message(
				ModelError::VisibleSizeNotSet,
				"autoencoder: visible size was not set",
			)
		})
	}

	pub fn weights(&self) -> Result<&Rc<SharedVar>, ErrPack<ModelError>> {
		Ok(&self.allocated()?.weights)
	}

	pub fn visbias(&self) -> Result<&Rc<SharedVar>, ErrPack<ModelError>> {
		Ok(&self.allocated()?.visbias)
	}

	pub fn hidbias(&self) -> &Rc<SharedVar> {
		&self.hidbias
	}

	/// `act_enc(hidbias + x·W)`
	pub fn encode(&self, x: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		let w = self.weights()?;
		Ok(self.act_enc.apply(self.hidbias.to_expr() + x.to_expr().dot(w.to_expr())))
	}

	/// `act_dec(visbias + h·W')`, where `W'` is `Wᵀ` for tied weights
	pub fn decode(&self, h: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		let allocated = self.allocated()?;
		let w_prime = match &allocated.w_prime {
			Some(w_prime) => w_prime.to_expr(),
			None => allocated.weights.to_expr().T(),
		};
		Ok(self.act_dec.apply(allocated.visbias.to_expr() + h.to_expr().dot(w_prime)))
	}
}

impl Reconstruct for Autoencoder {
	fn reconstruct(&self, x: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		self.decode(&self.encode(x)?)
	}
}

impl Model for Autoencoder {
	fn collect_params(&self, f: &mut dyn FnMut(Rc<SharedVar>)) {
		if let Some(allocated) = &self.weights {
			f(allocated.visbias.clone());
		}
		f(self.hidbias.clone());
		if let Some(allocated) = &self.weights {
			f(allocated.weights.clone());
			if let Some(w_prime) = &allocated.w_prime {
				f(w_prime.clone());
			}
		}
	}

	fn collect_named_params(&self, prefix: &str, f: &mut dyn FnMut(String, Rc<SharedVar>)) {
		self.collect_params(&mut |p| {
			let name = format!("{prefix}.{}", p.name());
			f(name, p);
		});
	}

	fn monitor_slot(&mut self) -> &mut Option<Monitor> {
		&mut self.monitor
	}
}

//--------------------------------------------------------------------------------------------------
