//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::error::Error;

use x17gsn::ErrPack;
use x17gsn::config::{GsnConfig, SgdCoef};
use x17gsn::dataset::DenseDesignMatrix;
use x17gsn::expr::{TensorRef, ToExpr};
use x17gsn::monitor::Monitor;
use x17gsn::nn::{Cost, Gsn, GsnWalkbackCost, MeanBinaryCrossEntropy, MeanSquaredReconstructionError};
use x17gsn::rng::Rng;
use x17gsn::tensor::{self, Tensor, TensorOpError};
use x17gsn::train::Sgd;

/// Binary images of `side × side` pixels. Each image has either horizontal or
/// vertical bars, every bar switched on with probability 1/2.
fn bars(rng: &mut Rng, count: usize, side: usize) -> Result<Tensor, ErrPack<TensorOpError>> {
	let mut data = Vec::with_capacity(count * side * side);
	for _ in 0..count {
		let vertical = rng.bernoulli(0.5) > 0.0;
		let on: Vec<f64> = (0..side).map(|_| rng.bernoulli(0.5)).collect();
		for row in 0..side {
			for col in 0..side {
				let bar = if vertical { col } else { row };
				data.push(on.get(bar).copied().unwrap_or(0.0));
			}
		}
	}
	tensor::from_vec(&[count, side * side], data)
}

fn main() -> Result<(), Box<dyn Error>> {
	stderrlog::new().module(module_path!()).module("x17gsn").verbosity(2usize).init()?;

	let side = 4;
	let mut rng = Rng::from_seed(7);
	let mut train = DenseDesignMatrix::new(bars(&mut rng, 200, side)?)?;
	let valid = DenseDesignMatrix::new(bars(&mut rng, 50, side)?)?;

	let config = GsnConfig {
		layer_sizes: vec![0, 32, 32],
		irange: 0.1,
		vis_corruption_level: 0.2,
		hidden_pre_noise: 0.5,
		hidden_post_noise: 0.5,
		walkback: 2,
		..GsnConfig::default()
	};
	let mut gsn = Gsn::from_config(&config)?;
	gsn.set_visible_size(side * side);

	let cost = GsnWalkbackCost::new(MeanBinaryCrossEntropy, config.walkback);
	let sgd = Sgd::new(&gsn, &cost, &SgdCoef::default())?;

	let ipt = TensorRef::matrix("monitor_X");
	let mse = MeanSquaredReconstructionError.expr(&gsn, &ipt.to_expr())?;
	let walkback_cost = cost.expr(&gsn, &ipt.to_expr())?;
	let monitor = Monitor::get_monitor(&mut gsn);
	monitor.set_dataset(Box::new(valid), 5, 10)?;
	monitor.add_channel("reconstruction_mse", &ipt, mse)?;
	monitor.add_channel("walkback_bce", &ipt, walkback_cost)?;
	monitor.run()?;

	for epoch in 1..=20 {
		let cost = sgd.train_epoch(&mut gsn, &mut train, 10)?;
		log::info!("epoch {epoch}: training cost {cost:.4}");
		Monitor::get_monitor(&mut gsn).run()?;
	}
	Ok(())
}
