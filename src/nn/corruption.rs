//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Noise that the GSN injects before and after each layer's activation.

use std::rc::Rc;

use crate::expr::Expr;
use crate::random::RandomStreams;

//--------------------------------------------------------------------------------------------------

pub trait Corruptor {
	fn corrupt(&self, x: Expr) -> Expr;
}

/// Zeroes each unit with probability `corruption_level`.
pub struct BinomialCorruptor {
	corruption_level: f64,
	streams: Rc<RandomStreams>,
}

impl BinomialCorruptor {
	pub fn new(corruption_level: f64, streams: Rc<RandomStreams>) -> Rc<Self> {
		Rc::new(Self { corruption_level, streams })
	}
}

impl Corruptor for BinomialCorruptor {
	fn corrupt(&self, x: Expr) -> Expr {
		if self.corruption_level <= 0.0 {
			return x;
		}
		let keep = self.streams.binomial_like(x.clone(), 1.0 - self.corruption_level);
		x * keep
	}
}

/// Adds zero-mean normal noise.
pub struct GaussianCorruptor {
	stdev: f64,
	streams: Rc<RandomStreams>,
}

impl GaussianCorruptor {
	pub fn new(stdev: f64, streams: Rc<RandomStreams>) -> Rc<Self> {
		Rc::new(Self { stdev, streams })
	}
}

impl Corruptor for GaussianCorruptor {
	fn corrupt(&self, x: Expr) -> Expr {
		if self.stdev <= 0.0 {
			return x;
		}
		let noise = self.streams.normal_like(x.clone(), self.stdev);
		x + noise
	}
}

/// Replaces each unit with probability `corruption_level` by 0 or 1, chosen with equal odds.
pub struct SaltPepperCorruptor {
	corruption_level: f64,
	streams: Rc<RandomStreams>,
}

impl SaltPepperCorruptor {
	pub fn new(corruption_level: f64, streams: Rc<RandomStreams>) -> Rc<Self> {
		Rc::new(Self { corruption_level, streams })
	}
}

impl Corruptor for SaltPepperCorruptor {
	fn corrupt(&self, x: Expr) -> Expr {
		if self.corruption_level <= 0.0 {
			return x;
		}
		let keep = self.streams.binomial_like(x.clone(), 1.0 - self.corruption_level);
		let salt = self.streams.binomial_like(x.clone(), 0.5);
		x * keep.clone() + keep.eq_zero() * salt
	}
}

/// Treats the input as probabilities and samples a binary value for each unit.
pub struct BinomialSampler {
	streams: Rc<RandomStreams>,
}

impl BinomialSampler {
	pub fn new(streams: Rc<RandomStreams>) -> Rc<Self> {
		Rc::new(Self { streams })
	}
}

impl Corruptor for BinomialSampler {
	fn corrupt(&self, x: Expr) -> Expr {
		self.streams.binomial(x)
	}
}

/// Function composition of corruptors: the last one in the list is applied first.
pub struct ComposedCorruptor {
	corruptors: Vec<Rc<dyn Corruptor>>,
}

impl ComposedCorruptor {
	pub fn new(corruptors: Vec<Rc<dyn Corruptor>>) -> Rc<Self> {
		Rc::new(Self { corruptors })
	}
}

impl Corruptor for ComposedCorruptor {
	fn corrupt(&self, x: Expr) -> Expr {
		self.corruptors.iter().rev().fold(x, |x, c| c.corrupt(x))
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::expr::{TensorRef, ToExpr};
	use crate::function::FunctionBuilder;
	use crate::tensor::{self, Tensor};
	use assert_approx_eq::assert_approx_eq;

	struct AddConst(f64);

	impl Corruptor for AddConst {
		fn corrupt(&self, x: Expr) -> Expr {
			x + self.0
		}
	}

	struct MulConst(f64);

	impl Corruptor for MulConst {
		fn corrupt(&self, x: Expr) -> Expr {
			x * self.0
		}
	}

	fn apply(c: &dyn Corruptor, x: Tensor) -> Tensor {
		let x_ref = TensorRef::new("x", x.ndim());
		let f = FunctionBuilder::new()
			.input(&x_ref)
			.output(c.corrupt(x_ref.to_expr()))
			.compile()
			.unwrap();
		f.call(&[x]).unwrap().remove(0)
	}

	#[test]
	fn composed_applies_last_first() {
		let add: Rc<dyn Corruptor> = Rc::new(AddConst(1.0));
		let mul: Rc<dyn Corruptor> = Rc::new(MulConst(2.0));
		let composed = ComposedCorruptor::new(vec![add, mul]);
		let out = apply(composed.as_ref(), tensor::scalar(1.0));
		// add(mul(1)) = 3
		assert_approx_eq!(tensor::to_scalar(&out).unwrap(), 3.0);
	}

	#[test]
	fn binomial_corruptor_zeroes_units() {
		let streams = RandomStreams::new(11);
		let c = BinomialCorruptor::new(0.3, streams);
		let out = apply(c.as_ref(), tensor::zeros(&[100, 50]).mapv(|_| 2.0));
		let zeros = out.iter().filter(|&&v| v == 0.0).count();
		assert!(out.iter().all(|&v| v == 0.0 || v == 2.0));
		assert!((zeros as f64 / 5000.0 - 0.3).abs() < 0.03);
	}

	#[test]
	fn salt_pepper_outputs_input_or_binary() {
		let streams = RandomStreams::new(5);
		let c = SaltPepperCorruptor::new(0.5, streams);
		let out = apply(c.as_ref(), tensor::zeros(&[100, 40]).mapv(|_| 0.25));
		let kept = out.iter().filter(|&&v| v == 0.25).count();
		assert!(out.iter().all(|&v| v == 0.25 || v == 0.0 || v == 1.0));
		assert!((kept as f64 / 4000.0 - 0.5).abs() < 0.05);
	}

	#[test]
	fn gaussian_zero_stdev_is_identity() {
		let streams = RandomStreams::new(5);
		let c = GaussianCorruptor::new(0.0, streams);
		let x = tensor::from_rows(&[&[0.5, -1.0]]).unwrap();
		assert_eq!(apply(c.as_ref(), x.clone()), x);
	}

	#[test]
	fn sampler_is_binary() {
		let streams = RandomStreams::new(9);
		let c = BinomialSampler::new(streams);
		let x = tensor::from_rows(&[&[0.0, 1.0, 0.5], &[1.0, 0.0, 0.5]]).unwrap();
		let out = apply(c.as_ref(), x);
		assert_eq!(out[[0, 0]], 0.0);
		assert_eq!(out[[0, 1]], 1.0);
		assert_eq!(out[[1, 0]], 1.0);
		assert_eq!(out[[1, 1]], 0.0);
		assert!(out[[0, 2]] == 0.0 || out[[0, 2]] == 1.0);
	}
}

//--------------------------------------------------------------------------------------------------
