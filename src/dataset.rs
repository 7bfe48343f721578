//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::tensor::{self, Tensor};
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DatasetError {
	Empty,
	InvalidShape,
	InvalidBatchSize,
}

/// A stream of minibatches. Each example is a row of the design matrix.
pub trait Dataset {
	fn num_examples(&self) -> usize;

	/// Opaque position that `set_stream_position()` accepts to resume the stream.
	fn get_stream_position(&self) -> usize;
	fn set_stream_position(&mut self, position: usize);

	/// Rewinds to the first example.
	fn restart_stream(&mut self);

	/// Next `batch_size` examples as a `[batch_size, features]` matrix.
	fn get_batch_design(&mut self, batch_size: usize) -> Result<Tensor, ErrPack<DatasetError>>;
}

//--------------------------------------------------------------------------------------------------

/// In-memory design matrix. Batches are taken in order and wrap around at the end.
pub struct DenseDesignMatrix {
	x: Tensor,
	position: usize,
}

impl DenseDesignMatrix {
	pub fn new(x: Tensor) -> Result<Self, ErrPack<DatasetError>> {
		if x.ndim() != 2 {
			cold_path();
			return Err(ErrPack::with_message(
				DatasetError::InvalidShape,
				format!("design matrix must have 2 dimensions, got {}", x.ndim()),
			));
		}
		if x.shape().first().is_none_or(|&rows| rows == 0) {
			cold_path();
			return Err(ErrPack::with_message(DatasetError::Empty, "design matrix has no rows"));
		}
		Ok(Self { x, position: 0 })
	}

	pub fn num_features(&self) -> usize {
		self.x.shape().get(1).copied().unwrap_or(0)
	}

	pub fn design(&self) -> &Tensor {
		&self.x
	}
}

impl Dataset for DenseDesignMatrix {
	fn num_examples(&self) -> usize {
		self.x.shape().first().copied().unwrap_or(0)
	}

	fn get_stream_position(&self) -> usize {
		self.position
	}

	fn set_stream_position(&mut self, position: usize) {
		self.position = position % self.num_examples().max(1);
	}

	fn restart_stream(&mut self) {
		self.position = 0;
	}

	fn get_batch_design(&mut self, batch_size: usize) -> Result<Tensor, ErrPack<DatasetError>> {
		if batch_size == 0 {
			cold_path();
			return Err(ErrPack::with_message(
				DatasetError::InvalidBatchSize,
				"batch size must be positive",
			));
		}
		let n = self.num_examples();
		let rows: Vec<usize> = (0..batch_size).map(|i| (self.position + i) % n).collect();
		self.position = (self.position + batch_size) % n;
		let batch = self.x.select(ndarray::Axis(0), &rows);
		debug_assert_eq!(batch.shape().first(), Some(&batch_size));
		Ok(batch)
	}
}

/// Builds a design matrix from rows of equal length.
pub fn dense_from_rows(rows: &[&[f64]]) -> Result<DenseDesignMatrix, ErrPack<DatasetError>> {
	let x = tensor::from_rows(rows).map_err(|e| ErrPack::wrap(DatasetError::InvalidShape, e))?;
	DenseDesignMatrix::new(x)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn batches_wrap_around() -> Result<(), ErrPack<DatasetError>> {
		let mut ds = dense_from_rows(&[&[0.0], &[1.0], &[2.0]])?;
		let a = ds.get_batch_design(2)?;
		assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0]);
		let b = ds.get_batch_design(2)?;
		assert_eq!(b.iter().copied().collect::<Vec<_>>(), vec![2.0, 0.0]);
		assert_eq!(ds.get_stream_position(), 1);
		ds.restart_stream();
		let c = ds.get_batch_design(1)?;
		assert_eq!(c.iter().copied().collect::<Vec<_>>(), vec![0.0]);
		Ok(())
	}

	#[test]
	fn rejects_bad_input() {
		let err = DenseDesignMatrix::new(tensor::zeros(&[3])).err().map(|e| e.code);
		assert_eq!(err, Some(DatasetError::InvalidShape));
		let err = DenseDesignMatrix::new(tensor::zeros(&[0, 3])).err().map(|e| e.code);
		assert_eq!(err, Some(DatasetError::Empty));
		let mut ds = DenseDesignMatrix::new(tensor::zeros(&[2, 3])).unwrap();
		assert_eq!(ds.get_batch_design(0).err().map(|e| e.code), Some(DatasetError::InvalidBatchSize));
	}
}

//--------------------------------------------------------------------------------------------------
