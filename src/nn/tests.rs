//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::rc::Rc;

use assert_approx_eq::assert_approx_eq;

use crate::ErrPack;
use crate::config::{GsnConfig, SgdCoef};
use crate::dataset::{Dataset, dense_from_rows};
use crate::expr::{Expr, TensorRef, ToExpr};
use crate::function::FunctionBuilder;
use crate::monitor::Monitor;
use crate::random::RandomStreams;
use crate::shared::SharedVar;
use crate::tensor::{self, Tensor};
use crate::train::{Sgd, TrainError};

use super::*;

//--------------------------------------------------------------------------------------------------

fn tied(nvis: usize, nhid: usize, streams: &Rc<RandomStreams>) -> Autoencoder {
	Autoencoder::new(nvis, nhid, Activation::Tanh, Activation::Sigmoid, true, 0.5, streams.clone())
}

/// GSN without any noise, so its output can be computed by hand.
fn noiseless(sizes: &[usize], streams: &Rc<RandomStreams>) -> Gsn {
	let aes = sizes.windows(2).map(|p| tied(p[0], p[1], streams)).collect();
	Gsn::new(aes, None, None).unwrap()
}

fn eval(x_ref: &Rc<TensorRef>, outputs: &[Expr], x: &Tensor) -> Vec<Tensor> {
	let mut builder = FunctionBuilder::new().input(x_ref);
	for out in outputs {
		builder = builder.output(out.clone());
	}
	builder.compile().unwrap().call(&[x.clone()]).unwrap()
}

/// Adds a constant, so corrupted values can be followed by hand.
struct Shift(f64);

impl Corruptor for Shift {
	fn corrupt(&self, x: Expr) -> Expr {
		x + self.0
	}
}

fn shift(v: f64) -> Option<Rc<dyn Corruptor>> {
	Some(Rc::new(Shift(v)))
}

fn batch() -> Tensor {
	tensor::from_rows(&[&[1.0, 0.0, 1.0, 0.0], &[0.0, 1.0, 1.0, 1.0], &[1.0, 1.0, 0.0, 0.0]])
		.unwrap()
}

//--------------------------------------------------------------------------------------------------

#[test]
fn step_lengths_follow_signal() {
	let streams = RandomStreams::new(1);
	let gsn = noiseless(&[4, 3, 3, 2], &streams);
	let x = TensorRef::matrix("x").to_expr();
	let steps = gsn.run(&x, 2, None).unwrap();
	// the input, then len(aes) + walkback updates
	assert_eq!(steps.len(), 1 + 3 + 2);
	let lens: Vec<usize> = steps.iter().map(Vec::len).collect();
	assert_eq!(lens, vec![1, 3, 4, 4, 4, 4]);
}

#[test]
fn walkback_corruption_schedule() {
	// four layers of one unit each, linear, zero biases, weights 2, 1, 1
	let streams = RandomStreams::new(1);
	let aes: Vec<Autoencoder> = [2.0, 1.0, 1.0]
		.into_iter()
		.map(|w| {
			let ae = Autoencoder::new(
				1,
				1,
				Activation::Linear,
				Activation::Linear,
				true,
				0.1,
				streams.clone(),
			);
			ae.weights().unwrap().set_value(tensor::from_rows(&[&[w]]).unwrap()).unwrap();
			ae
		})
		.collect();
	let pre = vec![None, shift(0.5), None, None];
	let post = vec![shift(1.0), shift(10.0), shift(100.0), shift(1000.0)];
	let gsn = Gsn::new(aes, Some(pre), Some(post)).unwrap();

	let x_ref = TensorRef::matrix("x");
	let steps = gsn.run(&x_ref.to_expr(), 0, None).unwrap();
	let flat: Vec<Expr> = steps.iter().flatten().cloned().collect();
	let values = eval(&x_ref, &flat, &tensor::from_rows(&[&[1.0]]).unwrap());
	let values: Vec<f64> = values.iter().map(|v| v[[0, 0]]).collect();

	// step 0: the input after visible corruption, 1 + 1
	// step 1: h1 = 2*2 + 0.5 + 10, v = 2*h1, h2 = h1; h3 is not reached and stays clean
	// step 2: v and h2 from step 1 were corrupted by +1 and +100 before the update
	//         h1 = 2*30 + 114.5 + 0.5 + 10, h3 = 114.5 + 1000, v = 2*h1, h2 = h1 + h3
	// step 3: h1 = 2*371 + 1399.5 + 0.5 + 10, h3 = 1399.5 + 1000, v = 2*h1, h2 = h1 + h3
	#[rustfmt::skip]
	let expected = [
		2.0,
		29.0, 14.5, 14.5,
		370.0, 185.0, 1299.5, 1114.5,
		4304.0, 2152.0, 4551.5, 2399.5,
	];
	assert_eq!(values.len(), expected.len());
	for (v, e) in values.iter().zip(expected) {
		assert_approx_eq!(*v, e);
	}
}

#[test]
fn walkback_cost_is_mean_of_sample_costs() {
	let streams = RandomStreams::new(5);
	let gsn = noiseless(&[4, 3, 2], &streams);
	let x_ref = TensorRef::matrix("x");
	let x = x_ref.to_expr();
	let cost = GsnWalkbackCost::new(MeanSquaredReconstructionError, 2).expr(&gsn, &x).unwrap();
	let mut outputs = vec![cost];
	for z in gsn.get_samples(&x, 2).unwrap() {
		outputs.push(MeanSquaredReconstructionError.between(&x, z));
	}
	let values = eval(&x_ref, &outputs, &batch());
	let per_sample: Vec<f64> =
		values.iter().skip(1).map(|v| tensor::to_scalar(v).unwrap()).collect();
	assert_eq!(per_sample.len(), 3);
	let mean = per_sample.iter().sum::<f64>() / 3.0;
	assert_approx_eq!(tensor::to_scalar(&values[0]).unwrap(), mean);
}

#[test]
fn sample_count() {
	let streams = RandomStreams::new(1);
	let gsn = noiseless(&[4, 3, 2], &streams);
	let x_ref = TensorRef::matrix("x");
	let samples = gsn.get_samples(&x_ref.to_expr(), 3).unwrap();
	assert_eq!(samples.len(), 4);
	let values = eval(&x_ref, &samples, &batch());
	for v in &values {
		assert_eq!(v.shape(), &[3, 4]);
		assert!(v.iter().all(|&p| p > 0.0 && p < 1.0));
	}
}

#[test]
fn one_layer_reconstruction_matches_autoencoder() {
	let streams = RandomStreams::new(7);
	let gsn = noiseless(&[4, 3], &streams);
	let ae = &gsn.autoencoders()[0];
	let x_ref = TensorRef::matrix("x");
	let x = x_ref.to_expr();
	let out = eval(&x_ref, &[gsn.reconstruct(&x).unwrap(), ae.reconstruct(&x).unwrap()], &batch());
	for (a, b) in out[0].iter().zip(out[1].iter()) {
		assert_approx_eq!(a, b);
	}
}

#[test]
fn hidden_layer_sees_input_after_first_step() {
	let streams = RandomStreams::new(3);
	let gsn = noiseless(&[4, 3, 2], &streams);
	let ae = &gsn.autoencoders()[0];
	let x_ref = TensorRef::matrix("x");
	let x = x_ref.to_expr();
	let steps = gsn.run(&x, 0, None).unwrap();
	let out = eval(&x_ref, &[steps[1][1].clone(), ae.encode(&x).unwrap()], &batch());
	// the layer above is still zero, so h1 = act_enc(hb + x·W)
	for (a, b) in out[0].iter().zip(out[1].iter()) {
		assert_approx_eq!(a, b);
	}
}

#[test]
fn clamped_units_keep_input() {
	let gsn = Gsn::from_config(&GsnConfig {
		layer_sizes: vec![4, 5, 3],
		..GsnConfig::default()
	})
	.unwrap();
	let x_ref = TensorRef::matrix("x");
	let x = x_ref.to_expr();
	let mask = SharedVar::new("mask", tensor::from_vec(&[4], vec![1.0, 0.0, 0.0, 1.0]).unwrap());
	let steps = gsn.run(&x, 2, Some(&mask.to_expr())).unwrap();
	let visible: Vec<Expr> = steps.iter().skip(1).map(|s| s[0].clone()).collect();
	let input = batch();
	for v in eval(&x_ref, &visible, &input) {
		for row in 0..3 {
			assert_eq!(v[[row, 0]], input[[row, 0]]);
			assert_eq!(v[[row, 3]], input[[row, 3]]);
		}
	}
}

#[test]
fn visible_sizes_are_chained() {
	let streams = RandomStreams::new(1);
	let aes = vec![tied(6, 4, &streams), tied(0, 3, &streams)];
	let gsn = Gsn::new(aes, None, None).unwrap();
	assert_eq!(gsn.autoencoders()[1].nvis(), 4);
	assert_eq!(gsn.autoencoders()[1].weights().unwrap().shape(), vec![4, 3]);
	// vb, hb, W for each autoencoder
	assert_eq!(gsn.params().len(), 6);
	let names: Vec<String> = gsn.named_params("gsn").into_iter().map(|(n, _)| n).collect();
	assert_eq!(names[0], "gsn.aes.0.vb");
	assert_eq!(names[5], "gsn.aes.1.W");
}

#[test]
fn deferred_visible_size() {
	let streams = RandomStreams::new(1);
	let mut gsn = Gsn::new(vec![tied(0, 4, &streams), tied(0, 2, &streams)], None, None).unwrap();
	let x = TensorRef::matrix("x").to_expr();
	let err = gsn.run(&x, 0, None).unwrap_err();
	assert_eq!(err.code, ModelError::VisibleSizeNotSet);
	gsn.set_visible_size(4);
	assert_eq!(gsn.autoencoders()[0].weights().unwrap().shape(), vec![4, 4]);
	assert!(gsn.run(&x, 0, None).is_ok());
}

#[test]
fn construction_errors() {
	let streams = RandomStreams::new(1);

	let untied =
		Autoencoder::new(4, 3, Activation::Tanh, Activation::Sigmoid, false, 0.1, streams.clone());
	let err = Gsn::new(vec![untied], None, None).err().map(|e| e.code);
	assert_eq!(err, Some(ModelError::UntiedWeights));

	let err = Gsn::new(vec![tied(4, 3, &streams), tied(5, 2, &streams)], None, None)
		.err()
		.map(|e| e.code);
	assert_eq!(err, Some(ModelError::SizeMismatch));

	let err = Gsn::new(vec![tied(4, 3, &streams)], Some(vec![None]), None).err().map(|e| e.code);
	assert_eq!(err, Some(ModelError::CorruptorCount));

	let err = Gsn::new(Vec::new(), None, None).err().map(|e| e.code);
	assert_eq!(err, Some(ModelError::SizeMismatch));

	let err = Gsn::from_layer_sizes(
		&[4],
		None,
		None,
		None,
		Activation::Sigmoid,
		Activation::Tanh,
		0.1,
		&streams,
	)
	.err()
	.map(|e| e.code);
	assert_eq!(err, Some(ModelError::SizeMismatch));
}

#[test]
fn activation_names() {
	assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Rectify);
	assert_eq!("none".parse::<Activation>().unwrap(), Activation::Linear);
	assert_eq!("tanh".parse::<Activation>().unwrap().to_string(), "tanh");
	let err = "swish".parse::<Activation>().unwrap_err();
	assert_eq!(err.code, ModelError::UnknownActivation);
}

#[test]
fn from_config_samples_are_binary_input() {
	let gsn = Gsn::from_config(&GsnConfig {
		layer_sizes: vec![4, 6, 6],
		vis_corruption_level: 0.0,
		..GsnConfig::default()
	})
	.unwrap();
	let x_ref = TensorRef::matrix("x");
	let steps = gsn.run(&x_ref.to_expr(), 0, None).unwrap();
	let out = eval(&x_ref, &[steps[0][0].clone()], &batch());
	// the visible post-activation corruptor samples the input
	assert_eq!(out[0], batch());
}

#[test]
fn train_batch_installs_monitor() -> Result<(), ErrPack<TrainError>> {
	let streams = RandomStreams::new(9);
	let mut gsn = noiseless(&[4, 3], &streams);
	let cost = GsnWalkbackCost::new(MeanSquaredReconstructionError, 0);
	let sgd = Sgd::new(&gsn, &cost, &SgdCoef::default())?;
	assert!(gsn.monitor_slot().is_none());
	sgd.train_batch(&mut gsn, &batch())?;
	let monitor = Monitor::get_monitor(&mut gsn);
	assert_eq!(monitor.batches_seen(), 1);
	assert_eq!(monitor.examples_seen(), 3);
	Ok(())
}

#[test]
fn training_reduces_cost() -> Result<(), ErrPack<TrainError>> {
	let streams = RandomStreams::new(42);
	let mut gsn = noiseless(&[4, 6], &streams);
	let cost = GsnWalkbackCost::new(MeanSquaredReconstructionError, 0);
	let sgd = Sgd::new(&gsn, &cost, &SgdCoef { learning_rate: 0.2, momentum: 0.5 })?;
	let mut dataset = dense_from_rows(&[
		&[1.0, 0.0, 1.0, 0.0],
		&[0.0, 1.0, 0.0, 1.0],
		&[1.0, 1.0, 0.0, 0.0],
		&[0.0, 0.0, 1.0, 1.0],
	])?;
	let first = sgd.train_epoch(&mut gsn, &mut dataset, 2)?;
	let mut last = first;
	for _ in 0..500 {
		last = sgd.train_epoch(&mut gsn, &mut dataset, 2)?;
	}
	assert!(last < first * 0.7, "cost went from {first} to {last}");

	let monitor = Monitor::get_monitor(&mut gsn);
	assert_eq!(monitor.batches_seen(), 501 * 2);
	assert_eq!(monitor.examples_seen(), 501 * 4);
	assert_eq!(dataset.num_examples(), 4);
	Ok(())
}

//--------------------------------------------------------------------------------------------------
