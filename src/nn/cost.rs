//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::expr::Expr;
use crate::util::LossyInto;

use super::{Gsn, ModelError, Reconstruct};

//--------------------------------------------------------------------------------------------------

/// Scalar training objective of a model `M` on the minibatch `x`.
pub trait Cost<M: ?Sized> {
	fn expr(&self, model: &M, x: &Expr) -> Result<Expr, ErrPack<ModelError>>;
}

/// Distance between a minibatch `x` and its reconstruction `z`, averaged over rows.
pub trait ReconstructionCriterion {
	fn between(&self, x: &Expr, z: Expr) -> Expr;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredReconstructionError;

impl ReconstructionCriterion for MeanSquaredReconstructionError {
	fn between(&self, x: &Expr, z: Expr) -> Expr {
		(z - x.clone()).square().sum_axis(1).mean()
	}
}

impl<M: Reconstruct + ?Sized> Cost<M> for MeanSquaredReconstructionError {
	fn expr(&self, model: &M, x: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		Ok(self.between(x, model.reconstruct(x)?))
	}
}

/// Cross entropy of binary targets. `z` has to be in the open interval (0, 1).
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanBinaryCrossEntropy;

impl ReconstructionCriterion for MeanBinaryCrossEntropy {
	fn between(&self, x: &Expr, z: Expr) -> Expr {
		let pos = x.clone() * z.clone().ln();
		let neg = (1.0 - x.clone()) * (1.0 - z).ln();
		(-(pos + neg)).sum_axis(1).mean()
	}
}

impl<M: Reconstruct + ?Sized> Cost<M> for MeanBinaryCrossEntropy {
	fn expr(&self, model: &M, x: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		Ok(self.between(x, model.reconstruct(x)?))
	}
}

/// Averages `criterion` over every sample the GSN produces during the walkback.
pub struct GsnWalkbackCost<C: ReconstructionCriterion> {
	pub criterion: C,
	pub walkback: usize,
}

impl<C: ReconstructionCriterion> GsnWalkbackCost<C> {
	pub fn new(criterion: C, walkback: usize) -> Self {
		Self { criterion, walkback }
	}
}

impl<C: ReconstructionCriterion> Cost<Gsn> for GsnWalkbackCost<C> {
	fn expr(&self, model: &Gsn, x: &Expr) -> Result<Expr, ErrPack<ModelError>> {
		let samples = model.get_samples(x, self.walkback)?;
		let count: f64 = samples.len().lossy_into();
		let total = samples
			.into_iter()
			.map(|z| self.criterion.between(x, z))
			.reduce(|a, b| a + b)
			.unwrap_or_else(|| Expr::new_const(0.0));
		Ok(total / count.max(1.0))
	}
}

//--------------------------------------------------------------------------------------------------
