//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use crate::expr::{Expr, RandomKind};
use crate::rng::Rng;
use crate::tensor::Tensor;

//--------------------------------------------------------------------------------------------------

/// Source of random nodes in expression graphs.
///
/// A random node draws new values every time a compiled function containing it is
/// called. Inside one call, the node is evaluated once, so all its uses see the same
/// sample.
pub struct RandomStreams {
	rng: RefCell<Rng>,
}

impl RandomStreams {
	pub fn new(seed: u64) -> Rc<Self> {
		Rc::new(Self { rng: RefCell::new(Rng::from_seed(seed)) })
	}

	/// Ones with probability `p`, zeros otherwise, shaped like `like`.
	pub fn binomial_like(self: &Rc<Self>, like: Expr, p: f64) -> Expr {
		Expr::new_random(RandomKind::BinomialMask { p }, like, self.clone())
	}

	/// Bernoulli sample of every element of `p`.
	pub fn binomial(self: &Rc<Self>, p: Expr) -> Expr {
		Expr::new_random(RandomKind::Bernoulli, p, self.clone())
	}

	/// Normal noise with mean 0, shaped like `like`.
	pub fn normal_like(self: &Rc<Self>, like: Expr, std: f64) -> Expr {
		Expr::new_random(RandomKind::Normal { std }, like, self.clone())
	}

	/// Draws a sample for a random node whose input evaluated to `input`.
	pub fn sample(&self, kind: RandomKind, input: &Tensor) -> Tensor {
		let mut rng = self.rng.borrow_mut();
		match kind {
			RandomKind::BinomialMask { p } => input.mapv(|_| rng.bernoulli(p)),
			RandomKind::Bernoulli => input.mapv(|p| rng.bernoulli(p)),
			RandomKind::Normal { std } => input.mapv(|_| rng.normal() * std),
		}
	}

	/// Uniform values in `[-irange, irange]`, used for weight initialization.
	pub fn uniform(&self, shape: &[usize], irange: f64) -> Tensor {
		let mut rng = self.rng.borrow_mut();
		crate::tensor::zeros(shape).mapv(|_| rng.uniform_range(-irange, irange))
	}
}

//--------------------------------------------------------------------------------------------------
