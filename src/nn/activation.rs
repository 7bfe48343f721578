//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::str::FromStr;

use crate::ErrPack;
use crate::expr::Expr;

use super::ModelError;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Activation {
	Linear,
	#[default]
	Sigmoid,
	Tanh,
	Softplus,
	Rectify,
}

impl Activation {
	pub fn apply(self, x: Expr) -> Expr {
		match self {
			Self::Linear => x,
			Self::Sigmoid => x.sigmoid(),
			Self::Tanh => x.tanh(),
			Self::Softplus => x.softplus(),
			Self::Rectify => x.rectify(),
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::Linear => "linear",
			Self::Sigmoid => "sigmoid",
			Self::Tanh => "tanh",
			Self::Softplus => "softplus",
			Self::Rectify => "rectify",
		}
	}
}

impl FromStr for Activation {
	type Err = ErrPack<ModelError>;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"linear" | "none" => Ok(Self::Linear),
			"sigmoid" => Ok(Self::Sigmoid),
			"tanh" => Ok(Self::Tanh),
			"softplus" => Ok(Self::Softplus),
			"rectify" | "relu" => Ok(Self::Rectify),
			_ => Err(ErrPack::with_message(
				ModelError::UnknownActivation,
				format!("unknown activation function: {s:?}"),
			)),
		}
	}
}

impl std::fmt::Display for Activation {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

//--------------------------------------------------------------------------------------------------
