//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Periodic evaluation of scalar quantities on a monitoring dataset.
//!
//! Every channel is a scalar expression of one minibatch input. A monitoring step
//! averages each channel over a fixed number of batches and appends the result,
//! together with the training progress, to the channel's records.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ErrPack;
use crate::dataset::{Dataset, DatasetError};
use crate::expr::{Expr, GraphError, TensorRef, ToExpr};
use crate::function::{Function, FunctionBuilder};
use crate::nn::Model;
use crate::shared::SharedVar;
use crate::tensor::{self, TensorOpError};
use crate::util::{LossyInto, cold_path};

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MonitorError {
	DuplicateChannel,
	NonScalarChannel,
	InvalidDataset,
	Compile,
	Eval,
	Dataset,
}

impl From<ErrPack<GraphError>> for ErrPack<MonitorError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<GraphError>) -> Self {
		ErrPack::wrap(MonitorError::Compile, err)
	}
}

impl From<ErrPack<TensorOpError>> for ErrPack<MonitorError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<TensorOpError>) -> Self {
		ErrPack::wrap(MonitorError::Eval, err)
	}
}

impl From<ErrPack<DatasetError>> for ErrPack<MonitorError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<DatasetError>) -> Self {
		ErrPack::wrap(MonitorError::Dataset, err)
	}
}

//--------------------------------------------------------------------------------------------------

pub struct Channel {
	name: String,
	ipt: Rc<TensorRef>,
	val: Expr,
	val_shared: Rc<SharedVar>, // sum of `val` over the batches of the current step
	batch_record: Vec<usize>,
	example_record: Vec<usize>,
	val_record: Vec<f64>,
}

impl Channel {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn ipt(&self) -> &Rc<TensorRef> {
		&self.ipt
	}

	pub fn val(&self) -> &Expr {
		&self.val
	}

	/// Batches seen by the model at each monitoring step.
	pub fn batch_record(&self) -> &[usize] {
		&self.batch_record
	}

	/// Examples seen by the model at each monitoring step.
	pub fn example_record(&self) -> &[usize] {
		&self.example_record
	}

	/// Value of the channel at each monitoring step.
	pub fn val_record(&self) -> &[f64] {
		&self.val_record
	}
}

struct CompiledMonitor {
	begin_record_entry: Function,
	accum: Function,
}

struct MonitorDataset {
	dataset: Box<dyn Dataset>,
	batches: usize,
	batch_size: usize,
}

/// Collects channel values over the course of training.
///
/// A new monitor starts as if the model had not been trained yet.
pub struct Monitor {
	channels: BTreeMap<String, Channel>,
	batches_seen: usize,
	examples_seen: usize,
	dataset: Option<MonitorDataset>,
	compiled: Option<CompiledMonitor>,
	dirty: bool,
}

impl Default for Monitor {
	fn default() -> Self {
		Self::new()
	}
}

impl Monitor {
	pub fn new() -> Self {
		Self {
			channels: BTreeMap::new(),
			batches_seen: 0,
			examples_seen: 0,
			dataset: None,
			compiled: None,
			dirty: true,
		}
	}

	/// Returns the monitor of `model`, attaching a new one if the model has none.
	pub fn get_monitor<M: Model + ?Sized>(model: &mut M) -> &mut Self {
		model.monitor_slot().get_or_insert_with(Self::new)
	}

	/// Each monitoring step evaluates the channels on `batches` batches of
	/// `batch_size` examples from `dataset`.
	pub fn set_dataset(
		&mut self,
		dataset: Box<dyn Dataset>,
		batches: usize,
		batch_size: usize,
	) -> Result<(), ErrPack<MonitorError>> {
		if batches == 0 || batch_size == 0 {
			cold_path();
			return Err(ErrPack::with_message(
				MonitorError::InvalidDataset,
				format!("monitor: batches ({batches}) and batch size ({batch_size}) must be positive"),
			));
		}
		self.dataset = Some(MonitorDataset { dataset, batches, batch_size });
		Ok(())
	}

	pub fn dataset(&self) -> Option<&dyn Dataset> {
		self.dataset.as_ref().map(|d| d.dataset.as_ref())
	}

	/// Adds a channel that tracks the scalar `val`, computed from a minibatch fed to
	/// `ipt`. Can be called at any time; the next monitoring step recompiles.
	pub fn add_channel<S: Into<String>, E: ToExpr>(
		&mut self,
		name: S,
		ipt: &Rc<TensorRef>,
		val: E,
	) -> Result<(), ErrPack<MonitorError>> {
		let name = name.into();
		let val = val.to_expr();
		if self.channels.contains_key(&name) {
			cold_path();
			return Err(ErrPack::with_message(
				MonitorError::DuplicateChannel,
				format!("monitor: tried to create channel {name:?} twice"),
			));
		}
		if val.ndim() != 0 {
			cold_path();
			return Err(ErrPack::with_message(
				MonitorError::NonScalarChannel,
				format!("monitor: channel {name:?} has {} dimensions, expected a scalar", val.ndim()),
			));
		}
		let channel = Channel {
			name: name.clone(),
			ipt: ipt.clone(),
			val,
			val_shared: SharedVar::new(format!("{name}_accum"), tensor::scalar(0.0)),
			batch_record: Vec::new(),
			example_record: Vec::new(),
			val_record: Vec::new(),
		};
		self.channels.insert(name, channel);
		self.dirty = true;
		Ok(())
	}

	pub fn channel(&self, name: &str) -> Option<&Channel> {
		self.channels.get(name)
	}

	/// Channels ordered by name.
	pub fn channels(&self) -> impl Iterator<Item = &Channel> {
		self.channels.values()
	}

	pub fn batches_seen(&self) -> usize {
		self.batches_seen
	}

	pub fn examples_seen(&self) -> usize {
		self.examples_seen
	}

	/// Called by training algorithms after each batch.
	pub fn report_batch(&mut self, num_examples: usize) {
		self.batches_seen += 1;
		self.examples_seen += num_examples;
	}

	/// Rebuilds the functions that reset and accumulate the channel values.
	pub fn redo_compile(&mut self) -> Result<(), ErrPack<MonitorError>> {
		let mut reset = FunctionBuilder::new();
		for channel in self.channels.values() {
			reset = reset.update(&channel.val_shared, 0.0);
		}

		let x = TensorRef::matrix("X");
		let mut accum = FunctionBuilder::new().input(&x);
		for channel in self.channels.values() {
			accum = accum
				.given(&channel.ipt, &x)
				.update(&channel.val_shared, channel.val_shared.to_expr() + channel.val.clone());
		}

		self.compiled = Some(CompiledMonitor {
			begin_record_entry: reset.compile()?,
			accum: accum.compile()?,
		});
		self.dirty = false;
		log::debug!("monitor: compiled {} channels", self.channels.len());
		Ok(())
	}

	/// Runs one monitoring step.
	///
	/// Does nothing but recompile when no dataset is set. The stream position of the
	/// dataset is the same after the step as before it.
	pub fn run(&mut self) -> Result<(), ErrPack<MonitorError>> {
		if self.dirty || self.compiled.is_none() {
			self.redo_compile()?;
		}
		let (Some(d), Some(compiled)) = (&mut self.dataset, &self.compiled) else {
			return Ok(());
		};

		let position = d.dataset.get_stream_position();
		d.dataset.restart_stream();
		let result = accumulate(compiled, d);
		d.dataset.set_stream_position(position);
		result?;

		log::info!("Monitoring step:");
		log::info!("\tBatches seen: {}", self.batches_seen);
		log::info!("\tExamples seen: {}", self.examples_seen);
		let batches: f64 = d.batches.lossy_into();
		for (name, channel) in &mut self.channels {
			let val = channel.val_shared.with_value(tensor::to_scalar)? / batches;
			channel.batch_record.push(self.batches_seen);
			channel.example_record.push(self.examples_seen);
			channel.val_record.push(val);
			log::info!("\t{name}: {val}");
		}
		Ok(())
	}
}

fn accumulate(compiled: &CompiledMonitor, d: &mut MonitorDataset) -> Result<(), ErrPack<MonitorError>> {
	compiled.begin_record_entry.call(&[])?;
	for _ in 0..d.batches {
		let x = d.dataset.get_batch_design(d.batch_size)?;
		compiled.accum.call(&[x])?;
	}
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dataset::dense_from_rows;
	use crate::nn::{Activation, Autoencoder};
	use crate::random::RandomStreams;
	use assert_approx_eq::assert_approx_eq;

	fn dataset() -> Box<dyn Dataset> {
		Box::new(dense_from_rows(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0], &[7.0, 8.0]]).unwrap())
	}

	#[test]
	fn averages_over_batches() {
		let ipt = TensorRef::matrix("ipt");
		let mut monitor = Monitor::new();
		monitor.set_dataset(dataset(), 2, 2).unwrap();
		monitor.add_channel("sum", &ipt, ipt.to_expr().sum()).unwrap();
		monitor.add_channel("mean", &ipt, ipt.to_expr().mean()).unwrap();

		monitor.report_batch(10);
		monitor.run().unwrap();

		let sum = monitor.channel("sum").unwrap();
		// batches sum to 10 and 26
		assert_approx_eq!(sum.val_record()[0], 18.0);
		assert_eq!(sum.batch_record(), &[1]);
		assert_eq!(sum.example_record(), &[10]);
		let mean = monitor.channel("mean").unwrap();
		assert_approx_eq!(mean.val_record()[0], 4.5);

		// accumulators are reset between steps
		monitor.run().unwrap();
		assert_approx_eq!(monitor.channel("sum").unwrap().val_record()[1], 18.0);
	}

	#[test]
	fn restores_stream_position() {
		let ipt = TensorRef::matrix("ipt");
		let mut ds = dense_from_rows(&[&[1.0], &[2.0], &[3.0]]).unwrap();
		ds.get_batch_design(1).unwrap();
		let mut monitor = Monitor::new();
		monitor.set_dataset(Box::new(ds), 2, 2).unwrap();
		monitor.add_channel("first", &ipt, ipt.to_expr().sum()).unwrap();
		monitor.run().unwrap();
		assert_eq!(monitor.dataset().map(|d| d.get_stream_position()), Some(1));
		// restarted: [1, 2] and [3, 1]
		assert_approx_eq!(monitor.channel("first").unwrap().val_record()[0], 3.5);
	}

	#[test]
	fn restores_stream_position_when_channel_fails() {
		let ipt = TensorRef::matrix("ipt");
		let mut ds = dense_from_rows(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]).unwrap();
		ds.get_batch_design(2).unwrap();
		let w = SharedVar::new("w", tensor::zeros(&[3, 1]));
		let mut monitor = Monitor::new();
		monitor.set_dataset(Box::new(ds), 2, 1).unwrap();
		// batches have 2 columns, `w` has 3 rows
		monitor.add_channel("bad", &ipt, ipt.to_expr().dot(w.to_expr()).sum()).unwrap();
		assert!(monitor.run().is_err());
		assert_eq!(monitor.dataset().map(|d| d.get_stream_position()), Some(2));
		assert!(monitor.channel("bad").unwrap().val_record().is_empty());
	}

	#[test]
	fn channel_errors() {
		let ipt = TensorRef::matrix("ipt");
		let mut monitor = Monitor::new();
		monitor.add_channel("a", &ipt, ipt.to_expr().sum()).unwrap();
		let err = monitor.add_channel("a", &ipt, ipt.to_expr().mean()).unwrap_err();
		assert_eq!(err.code, MonitorError::DuplicateChannel);
		let err = monitor.add_channel("b", &ipt, ipt.to_expr().sum_axis(1)).unwrap_err();
		assert_eq!(err.code, MonitorError::NonScalarChannel);
		let err = monitor.set_dataset(dataset(), 0, 2).unwrap_err();
		assert_eq!(err.code, MonitorError::InvalidDataset);
	}

	#[test]
	fn channel_added_after_use() {
		let ipt = TensorRef::matrix("ipt");
		let mut monitor = Monitor::new();
		monitor.set_dataset(dataset(), 1, 4).unwrap();
		monitor.add_channel("a", &ipt, ipt.to_expr().sum()).unwrap();
		monitor.run().unwrap();
		monitor.add_channel("b", &ipt, ipt.to_expr().square().sum()).unwrap();
		monitor.run().unwrap();
		assert_eq!(monitor.channel("a").unwrap().val_record().len(), 2);
		let b = monitor.channel("b").unwrap();
		assert_eq!(b.val_record().len(), 1);
		assert_approx_eq!(b.val_record()[0], 204.0);
		let names: Vec<&str> = monitor.channels().map(Channel::name).collect();
		assert_eq!(names, vec!["a", "b"]);
	}

	#[test]
	fn no_dataset_records_nothing() {
		let ipt = TensorRef::matrix("ipt");
		let mut monitor = Monitor::new();
		monitor.add_channel("a", &ipt, ipt.to_expr().sum()).unwrap();
		monitor.run().unwrap();
		assert!(monitor.channel("a").unwrap().val_record().is_empty());
	}

	#[test]
	fn model_gets_one_monitor() {
		let streams = RandomStreams::new(1);
		let mut ae =
			Autoencoder::new(3, 2, Activation::Sigmoid, Activation::Sigmoid, true, 0.1, streams);
		Monitor::get_monitor(&mut ae).report_batch(5);
		let monitor = Monitor::get_monitor(&mut ae);
		assert_eq!(monitor.batches_seen(), 1);
		assert_eq!(monitor.examples_seen(), 5);
	}
}

//--------------------------------------------------------------------------------------------------
