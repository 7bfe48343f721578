//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::rc::Rc;

pub mod activation;
pub mod autoencoder;
pub mod corruption;
pub mod cost;
pub mod gsn;

#[cfg(test)]
mod tests;

use crate::ErrPack;
use crate::expr::{Expr, GraphError};
use crate::monitor::Monitor;
use crate::shared::SharedVar;

pub use activation::Activation;
pub use autoencoder::Autoencoder;
pub use corruption::{
	BinomialCorruptor, BinomialSampler, ComposedCorruptor, Corruptor, GaussianCorruptor,
	SaltPepperCorruptor,
};
pub use cost::{
	Cost, GsnWalkbackCost, MeanBinaryCrossEntropy, MeanSquaredReconstructionError,
	ReconstructionCriterion,
};
pub use gsn::Gsn;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
	UntiedWeights,
	SizeMismatch,
	CorruptorCount,
	UnknownActivation,
	VisibleSizeNotSet,
	Graph,
}

impl From<ErrPack<GraphError>> for ErrPack<ModelError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<GraphError>) -> Self {
		ErrPack::wrap(ModelError::Graph, err)
	}
}

//--------------------------------------------------------------------------------------------------

/// A model with trainable parameters that can carry a monitor.
pub trait Model {
	fn collect_params(&self, f: &mut dyn FnMut(Rc<SharedVar>));
	fn collect_named_params(&self, prefix: &str, f: &mut dyn FnMut(String, Rc<SharedVar>));

	fn params(&self) -> Vec<Rc<SharedVar>> {
		let mut params = Vec::new();
		self.collect_params(&mut |p| params.push(p));
		params
	}

	fn named_params(&self, prefix: &str) -> Vec<(String, Rc<SharedVar>)> {
		let mut params = Vec::new();
		self.collect_named_params(prefix, &mut |name, p| params.push((name, p)));
		params
	}

	/// Storage for the monitor attached to this model. See `Monitor::get_monitor()`.
	fn monitor_slot(&mut self) -> &mut Option<Monitor>;
}

/// A model that maps a minibatch to a reconstruction of it.
pub trait Reconstruct {
	fn reconstruct(&self, x: &Expr) -> Result<Expr, ErrPack<ModelError>>;
}

//--------------------------------------------------------------------------------------------------
