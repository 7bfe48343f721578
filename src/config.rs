//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::nn::Activation;

//--------------------------------------------------------------------------------------------------

/// Hyperparameters of a GSN built by `Gsn::from_config()`.
#[derive(Debug, Clone)]
pub struct GsnConfig {
	/// Visible size first. A visible size of 0 is set later with `Gsn::set_visible_size()`.
	pub layer_sizes: Vec<usize>,
	pub visible_act: Activation,
	pub hidden_act: Activation,
	pub irange: f64,
	pub vis_corruption_level: f64, // salt and pepper
	pub hidden_pre_noise: f64,     // stdev
	pub hidden_post_noise: f64,    // stdev
	pub walkback: usize,
	pub seed: u64,
}

impl Default for GsnConfig {
	fn default() -> Self {
		Self {
			layer_sizes: vec![0, 1500, 1500],
			visible_act: Activation::Sigmoid,
			hidden_act: Activation::Tanh,
			irange: 1e-3,
			vis_corruption_level: 0.4,
			hidden_pre_noise: 2.0,
			hidden_post_noise: 2.0,
			walkback: 4,
			seed: 2014,
		}
	}
}

pub struct SgdCoef {
	pub learning_rate: f64,
	pub momentum: f64,
}

impl Default for SgdCoef {
	fn default() -> Self {
		Self { learning_rate: 0.05, momentum: 0.5 }
	}
}

//--------------------------------------------------------------------------------------------------
