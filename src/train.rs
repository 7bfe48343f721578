//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod sgd;

pub use sgd::Sgd;

use crate::ErrPack;
use crate::dataset::DatasetError;
use crate::expr::GraphError;
use crate::monitor::MonitorError;
use crate::nn::ModelError;
use crate::tensor::TensorOpError;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrainError {
	Model,
	Graph,
	Eval,
	Dataset,
	Monitor,
}

macro_rules! wrap_error {
	($from:ty => $code:expr) => {
		impl From<ErrPack<$from>> for ErrPack<TrainError> {
			#[cold]
			#[inline(never)]
			fn from(err: ErrPack<$from>) -> Self {
				ErrPack::wrap($code, err)
			}
		}
	};
}

wrap_error!(ModelError => TrainError::Model);
wrap_error!(GraphError => TrainError::Graph);
wrap_error!(TensorOpError => TrainError::Eval);
wrap_error!(DatasetError => TrainError::Dataset);
wrap_error!(MonitorError => TrainError::Monitor);

//--------------------------------------------------------------------------------------------------
