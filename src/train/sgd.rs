//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::rc::Rc;

use crate::ErrPack;
use crate::autograd;
use crate::config::SgdCoef;
use crate::dataset::Dataset;
use crate::expr::{Expr, TensorRef, ToExpr};
use crate::function::{Function, FunctionBuilder};
use crate::monitor::Monitor;
use crate::nn::{Cost, Model};
use crate::shared::SharedVar;
use crate::tensor::{self, Tensor};
use crate::util::{LossyInto, cold_path};

use super::TrainError;

//--------------------------------------------------------------------------------------------------

/// Minibatch gradient descent with optional momentum.
///
/// The cost, its gradient and the parameter updates are compiled into one function,
/// so a training step is a single call.
///
///     velocity := momentum * velocity - learning_rate * grad
///     param := param + velocity
pub struct Sgd {
	train_fn: Function,
	velocities: Vec<Rc<SharedVar>>,
}

impl Sgd {
	pub fn new<M: Model + ?Sized, C: Cost<M> + ?Sized>(
		model: &M,
		cost: &C,
		coef: &SgdCoef,
	) -> Result<Self, ErrPack<TrainError>> {
		let x = TensorRef::matrix("X");
		let cost_expr = cost.expr(model, &x.to_expr())?;
		let params = model.params();
		let wrt: Vec<Expr> = params.iter().map(ToExpr::to_expr).collect();
		let grads = autograd::grad(&cost_expr, &wrt)?;

		let mut builder = FunctionBuilder::new().input(&x).output(cost_expr);
		let mut velocities = Vec::new();
		for (param, g) in params.iter().zip(grads) {
			let step = g * coef.learning_rate;
			if coef.momentum > 0.0 {
				let velocity = SharedVar::new(
					format!("{}_velocity", param.name()),
					tensor::zeros(&param.shape()),
				);
				let new_velocity = velocity.to_expr() * coef.momentum - step;
				builder = builder
					.update(&velocity, new_velocity.clone())
					.update(param, param.to_expr() + new_velocity);
				velocities.push(velocity);
			} else {
				builder = builder.update(param, param.to_expr() - step);
			}
		}
		let train_fn = builder.compile()?;
		log::info!(
			"sgd: {} params, learning rate {}, momentum {}, {} steps per batch",
			params.len(),
			coef.learning_rate,
			coef.momentum,
			train_fn.num_steps()
		);
		Ok(Self { train_fn, velocities })
	}

	/// Sets all velocities to zero.
	pub fn reset_momentum(&self) -> Result<(), ErrPack<TrainError>> {
		for v in &self.velocities {
			v.set_value(tensor::zeros(&v.shape()))?;
		}
		Ok(())
	}

	/// Does one update on the minibatch `x` and returns the cost before the update.
	pub fn train_batch<M: Model + ?Sized>(
		&self,
		model: &mut M,
		x: &Tensor,
	) -> Result<f64, ErrPack<TrainError>> {
		let out = self.train_fn.call(std::slice::from_ref(x))?;
		let Some(cost) = out.first() else {
			cold_path();
			return Err(ErrPack::with_message(TrainError::Eval, "sgd: cost was not computed"));
		};
		let cost = tensor::to_scalar(cost)?;
		if !cost.is_finite() {
			log::warn!("sgd: cost is {cost}");
		}
		Monitor::get_monitor(model).report_batch(x.shape().first().copied().unwrap_or(0));
		Ok(cost)
	}

	/// One pass over `dataset` from its beginning. Returns the mean batch cost.
	pub fn train_epoch<M: Model + ?Sized>(
		&self,
		model: &mut M,
		dataset: &mut dyn Dataset,
		batch_size: usize,
	) -> Result<f64, ErrPack<TrainError>> {
		let batches = (dataset.num_examples() / batch_size.max(1)).max(1);
		dataset.restart_stream();
		let mut total = 0.0;
		for _ in 0..batches {
			let x = dataset.get_batch_design(batch_size)?;
			total += self.train_batch(model, &x)?;
		}
		let batches: f64 = batches.lossy_into();
		Ok(total / batches)
	}
}

//--------------------------------------------------------------------------------------------------
