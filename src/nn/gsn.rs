//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Generative Stochastic Network.
//!
//! A stack of tied autoencoders unrolled in time. Index 0 of the activation list is
//! the visible layer, index `i >= 1` is hidden layer `i`. At every step, odd layers
//! are recomputed from their neighbours first and even layers after them, so the
//! signal needs `2 * time` steps to reach the top of the stack and come back.

use std::rc::Rc;

use crate::ErrPack;
use crate::config::GsnConfig;
use crate::expr::{Expr, ToExpr};
use crate::monitor::Monitor;
use crate::random::RandomStreams;
use crate::shared::SharedVar;
use crate::util::cold_path;

use super::corruption::{
	BinomialSampler, ComposedCorruptor, Corruptor, GaussianCorruptor, SaltPepperCorruptor,
};
use super::{Activation, Autoencoder, Model, ModelError, Reconstruct};

//--------------------------------------------------------------------------------------------------

/// One corruptor per activation index. `None` leaves the layer unchanged.
pub type CorruptorList = Vec<Option<Rc<dyn Corruptor>>>;

pub struct Gsn {
	aes: Vec<Autoencoder>,
	preact_cors: CorruptorList,
	postact_cors: CorruptorList,
	monitor: Option<Monitor>,
}

fn layer<T>(items: &[T], i: usize) -> Result<&T, ErrPack<ModelError>> {
	items.get(i).ok_or_else(|| {
		cold_path();
		ErrPack::with_message(ModelError::SizeMismatch, format!("gsn: no layer with index {i}"))
	})
}

fn check_corruptors(
	which: &str,
	cors: Option<CorruptorList>,
	expected: usize,
) -> Result<CorruptorList, ErrPack<ModelError>> {
	match cors {
		None => Ok(vec![None; expected]),
		Some(cors) if cors.len() == expected => Ok(cors),
		Some(cors) => {
			cold_path();
			Err(ErrPack::with_message(
				ModelError::CorruptorCount,
				format!(
					"gsn: {which} corruptor list has {} entries, expected {expected}",
					cors.len()
				),
			))
		},
	}
}

impl Gsn {
	/// Builds a GSN from autoencoders ordered from the visible layer up.
	///
	/// Autoencoders after the first one that have no visible side yet get the hidden
	/// size of the autoencoder below them. The corruptor lists, when given, need one
	/// entry per activation index, i.e. `aes.len() + 1`.
	pub fn new(
		mut aes: Vec<Autoencoder>,
		preact_cors: Option<CorruptorList>,
		postact_cors: Option<CorruptorList>,
	) -> Result<Self, ErrPack<ModelError>> {
		if aes.is_empty() {
			cold_path();
			return Err(ErrPack::with_message(
				ModelError::SizeMismatch,
				"gsn: at least one autoencoder is required",
			));
		}
		if let Some(i) = aes.iter().position(|ae| !ae.tied_weights()) {
			cold_path();
			return Err(ErrPack::with_message(
				ModelError::UntiedWeights,
				format!("gsn: autoencoder {i} does not have tied weights"),
			));
		}

		for i in 1..aes.len() {
			let below_nhid = layer(&aes, i - 1)?.nhid();
			let Some(ae) = aes.get_mut(i) else {
				break;
			};
			if !ae.has_weights() {
				ae.set_visible_size(below_nhid);
			} else if ae.nvis() != below_nhid {
				cold_path();
				return Err(ErrPack::with_message(
					ModelError::SizeMismatch,
					format!(
						"gsn: autoencoder {i} has {} visible units, but the layer below has {below_nhid}",
						ae.nvis(),
					),
				));
			}
		}

		let expected = aes.len() + 1;
		let preact_cors = check_corruptors("pre-activation", preact_cors, expected)?;
		let postact_cors = check_corruptors("post-activation", postact_cors, expected)?;

		Ok(Self { aes, preact_cors, postact_cors, monitor: None })
	}

	/// Builds a GSN with one tied autoencoder per pair of adjacent layer sizes.
	///
	/// The visible layer is always binarized with a `BinomialSampler`; `vis_corruptor`,
	/// when given, is applied to the sample.
	#[allow(clippy::too_many_arguments)]
	pub fn from_layer_sizes(
		layer_sizes: &[usize],
		vis_corruptor: Option<Rc<dyn Corruptor>>,
		hidden_pre_corruptor: Option<Rc<dyn Corruptor>>,
		hidden_post_corruptor: Option<Rc<dyn Corruptor>>,
		visible_act: Activation,
		hidden_act: Activation,
		irange: f64,
		streams: &Rc<RandomStreams>,
	) -> Result<Self, ErrPack<ModelError>> {
		if layer_sizes.len() < 2 {
			cold_path();
			return Err(ErrPack::with_message(
				ModelError::SizeMismatch,
				format!("gsn: need at least 2 layer sizes, got {}", layer_sizes.len()),
			));
		}
		let aes: Vec<Autoencoder> = layer_sizes
			.windows(2)
			.filter_map(|pair| match *pair {
				[nvis, nhid] => Some(Autoencoder::new(
					nvis,
					nhid,
					hidden_act,
					visible_act,
					true,
					irange,
					streams.clone(),
				)),
				_ => None,
			})
			.collect();

		let sampler: Rc<dyn Corruptor> = BinomialSampler::new(streams.clone());
		let vis_corruptor: Rc<dyn Corruptor> = match vis_corruptor {
			Some(c) => ComposedCorruptor::new(vec![c, sampler]),
			None => sampler,
		};

		let n = aes.len();
		let mut preact_cors: CorruptorList = vec![None];
		preact_cors.extend(std::iter::repeat_n(hidden_pre_corruptor, n));
		let mut postact_cors: CorruptorList = vec![Some(vis_corruptor)];
		postact_cors.extend(std::iter::repeat_n(hidden_post_corruptor, n));

		Self::new(aes, Some(preact_cors), Some(postact_cors))
	}

	/// Salt and pepper noise on the visible layer, Gaussian noise before and after
	/// every hidden activation.
	pub fn from_config(config: &GsnConfig) -> Result<Self, ErrPack<ModelError>> {
		let streams = RandomStreams::new(config.seed);
		let vis: Option<Rc<dyn Corruptor>> = if config.vis_corruption_level > 0.0 {
			Some(SaltPepperCorruptor::new(config.vis_corruption_level, streams.clone()))
		} else {
			None
		};
		let pre: Option<Rc<dyn Corruptor>> = if config.hidden_pre_noise > 0.0 {
			Some(GaussianCorruptor::new(config.hidden_pre_noise, streams.clone()))
		} else {
			None
		};
		let post: Option<Rc<dyn Corruptor>> = if config.hidden_post_noise > 0.0 {
			Some(GaussianCorruptor::new(config.hidden_post_noise, streams.clone()))
		} else {
			None
		};
		log::debug!(
			"gsn: layers {:?}, visible {}, hidden {}",
			config.layer_sizes,
			config.visible_act,
			config.hidden_act
		);
		Self::from_layer_sizes(
			&config.layer_sizes,
			vis,
			pre,
			post,
			config.visible_act,
			config.hidden_act,
			config.irange,
			&streams,
		)
	}

	pub fn autoencoders(&self) -> &[Autoencoder] {
		&self.aes
	}

	/// Sets the size of the visible layer, i.e. of the first autoencoder.
	pub fn set_visible_size(&mut self, nvis: usize) {
		if let Some(ae) = self.aes.first_mut() {
			ae.set_visible_size(nvis);
		}
	}

	/// Runs the network for `len(aes) + walkback` steps.
	///
	/// Returns the activations after every step, starting with the corrupted input.
	/// A step only contains the layers the signal has reached so far.
	///
	/// Where `clamped` is 1, the visible layer is reset to `minibatch` after each
	/// update.
	pub fn run(
		&self,
		minibatch: &Expr,
		walkback: usize,
		clamped: Option<&Expr>,
	) -> Result<Vec<Vec<Expr>>, ErrPack<ModelError>> {
		let mut acts = self.initial_activations(minibatch)?;
		let mut steps = vec![vec![layer(&acts, 0)?.clone()]];

		let clamp = clamped.map(|mask| {
			let unclamped = mask.to_expr().eq_zero();
			(unclamped, minibatch.to_expr() * mask.to_expr())
		});

		for time in 1..=self.aes.len() + walkback {
			self.update(&mut acts, time)?;

			if let Some((unclamped, clamped_vals)) = &clamp {
				if let Some(vis) = acts.first_mut() {
					*vis = vis.clone() * unclamped.clone() + clamped_vals.clone();
				}
			}

			let reached = (2 * time + 1).min(acts.len());
			steps.push(acts.iter().take(reached).cloned().collect());

			let evens: Vec<usize> = (0..reached).step_by(2).collect();
			self.apply_postact_corruption(&mut acts, &evens);
		}
		Ok(steps)
	}

	/// Visible activations after the signal went up and back, and after each of the
	/// `walkback` extra steps. Returns `walkback + 1` samples.
	pub fn get_samples(
		&self,
		minibatch: &Expr,
		walkback: usize,
	) -> Result<Vec<Expr>, ErrPack<ModelError>> {
		let steps = self.run(minibatch, walkback, None)?;
		steps
			.iter()
			.skip(self.aes.len())
			.map(|step| layer(step, 0).cloned())
			.collect()
	}

	/// Activations of every layer after the signal reached the top of the stack.
	pub fn top_activations(&self, minibatch: &Expr) -> Result<Vec<Expr>, ErrPack<ModelError>> {
		let mut steps = self.run(minibatch, 0, None)?;
		steps.pop().ok_or_else(|| {
			cold_path();
			ErrPack::with_message(ModelError::SizeMismatch, "gsn: run produced no steps")
		})
	}

	fn initial_activations(&self, minibatch: &Expr) -> Result<Vec<Expr>, ErrPack<ModelError>> {
		let mut acts = Vec::with_capacity(self.aes.len() + 1);
		acts.push(self.postact_corrupt(0, minibatch.clone()));
		for (i, ae) in self.aes.iter().enumerate() {
			let below = layer(&acts, i)?.clone();
			acts.push(below.dot(ae.weights()?.to_expr()).zeros_like());
		}
		Ok(acts)
	}

	/// Recomputes the odd layers and corrupts them, then recomputes the even layers.
	///
	/// `time` limits the update to the layers the signal can reach, so no noise is
	/// added to layers that are still zero.
	fn update(&self, acts: &mut [Expr], time: usize) -> Result<(), ErrPack<ModelError>> {
		let odds: Vec<usize> = (1..(2 * time).min(acts.len())).step_by(2).collect();
		self.update_activations(acts, &odds)?;
		self.apply_postact_corruption(acts, &odds);

		let evens: Vec<usize> = (0..(2 * time + 1).min(acts.len())).step_by(2).collect();
		self.update_activations(acts, &evens)
	}

	fn postact_corrupt(&self, i: usize, x: Expr) -> Expr {
		match self.postact_cors.get(i) {
			Some(Some(c)) => c.corrupt(x),
			_ => x,
		}
	}

	fn apply_postact_corruption(&self, acts: &mut [Expr], indices: &[usize]) {
		for &i in indices {
			if let Some(act) = acts.get_mut(i) {
				*act = self.postact_corrupt(i, act.clone());
			}
		}
	}

	fn update_activations(
		&self,
		acts: &mut [Expr],
		indices: &[usize],
	) -> Result<(), ErrPack<ModelError>> {
		let last = acts.len().saturating_sub(1);
		for &i in indices {
			let from_above = |acts: &[Expr]| -> Result<Expr, ErrPack<ModelError>> {
				let ae = layer(&self.aes, i)?;
				let above = layer(acts, i + 1)?.clone();
				Ok(ae.visbias()?.to_expr() + above.dot(ae.weights()?.to_expr().T()))
			};
			let from_below = |acts: &[Expr]| -> Result<Expr, ErrPack<ModelError>> {
				let ae = layer(&self.aes, i - 1)?;
				let below = layer(acts, i - 1)?.clone();
				Ok(ae.hidbias().to_expr() + below.dot(ae.weights()?.to_expr()))
			};

			let mut x = if i == 0 {
				from_above(acts)?
			} else if i == last {
				from_below(acts)?
			} else {
				from_below(acts)? + from_above(acts)?
			};

			if let Some(Some(c)) = self.preact_cors.get(i) {
				x = c.corrupt(x);
			}

			let act = if i == 0 {
				layer(&self.aes, 0)?.act_dec()
			} else {
				layer(&self.aes, i - 1)?.act_enc()
			};

			if let Some(slot) = acts.get_mut(i) {
				*slot = act.apply(x);
			}
		}
		Ok(())
	}
}

impl Reconstruct for Gsn {
	/// One sample taken right after the signal reached the top and came back down.
	fn reconstruct(&self, x: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		let samples = self.get_samples(x, 0)?;
		layer(&samples, 0).cloned()
	}
}

impl Model for Gsn {
	fn collect_params(&self, f: &mut dyn FnMut(Rc<SharedVar>)) {
		for ae in &self.aes {
			ae.collect_params(f);
		}
	}

	fn collect_named_params(&self, prefix: &str, f: &mut dyn FnMut(String, Rc<SharedVar>)) {
		for (i, ae) in self.aes.iter().enumerate() {
			ae.collect_named_params(&format!("{prefix}.aes.{i}"), f);
		}
	}

	fn monitor_slot(&mut self) -> &mut Option<Monitor> {
		&mut self.monitor
	}
}

//--------------------------------------------------------------------------------------------------
