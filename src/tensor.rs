//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use ndarray::{ArrayD, Axis, Ix2, IxDyn, Zip};
use smallvec::SmallVec;

use crate::ErrPack;
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

/// Dense `f64` tensor with dynamic number of dimensions.
///
/// A 0-dimensional tensor is a scalar. Matrices are `[rows, cols]` and minibatches
/// are stored one example per row.
pub type Tensor = ArrayD<f64>;

pub type Shape = SmallVec<[usize; 4]>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TensorOpError {
	ShapeMismatch,
	NotEnoughDimensions,
	InvalidDimensions,
	InvalidArgs,
	InvalidValue,
}

impl TensorOpError {
	#[cold]
	#[inline(never)]
	pub fn shape_mismatch(op: &str, a: &[usize], b: &[usize]) -> ErrPack<Self> {
		ErrPack::with_message(Self::ShapeMismatch, format!("{op}: shape mismatch {a:?} vs {b:?}"))
	}

	#[cold]
	#[inline(never)]
	pub fn invalid_dimensions(op: &str, expected: usize, got: usize) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::InvalidDimensions,
			format!("{op}: expected {expected} dimensions, got {got}"),
		)
	}
}

//--------------------------------------------------------------------------------------------------

pub fn scalar(value: f64) -> Tensor {
	ArrayD::from_elem(IxDyn(&[]), value)
}

pub fn zeros(shape: &[usize]) -> Tensor {
	ArrayD::zeros(IxDyn(shape))
}

pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor, ErrPack<TensorOpError>> {
	let elems = shape.iter().product::<usize>();
	if elems != data.len() {
		cold_path();
		return Err(ErrPack::with_message(
			TensorOpError::ShapeMismatch,
			format!("from_vec: shape {shape:?} needs {elems} elements, got {}", data.len()),
		));
	}
	ArrayD::from_shape_vec(IxDyn(shape), data)
		.map_err(|e| ErrPack::wrap(TensorOpError::ShapeMismatch, e))
}

/// Builds a `[rows, cols]` matrix. All rows must have the same length.
pub fn from_rows(rows: &[&[f64]]) -> Result<Tensor, ErrPack<TensorOpError>> {
	let cols = rows.first().map_or(0, |r| r.len());
	let mut data = Vec::with_capacity(rows.len() * cols);
	for row in rows {
		if row.len() != cols {
			cold_path();
			return Err(TensorOpError::shape_mismatch("from_rows", &[cols], &[row.len()]));
		}
		data.extend_from_slice(row);
	}
	from_vec(&[rows.len(), cols], data)
}

/// Extracts the value of a tensor with exactly one element.
pub fn to_scalar(t: &Tensor) -> Result<f64, ErrPack<TensorOpError>> {
	if t.len() != 1 {
		cold_path();
		return Err(TensorOpError::shape_mismatch("to_scalar", &[], t.shape()));
	}
	t.iter().next().copied().ok_or_else(|| ErrPack::new(TensorOpError::InvalidValue))
}

//--------------------------------------------------------------------------------------------------

/// NumPy style broadcasting of two shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Shape, ErrPack<TensorOpError>> {
	let len = a.len().max(b.len());
	let skip_a = len - a.len();
	let skip_b = len - b.len();
	let mut result = Shape::with_capacity(len);
	for d in 0..len {
		let dim_a = if d < skip_a { 1 } else { a.get(d - skip_a).copied().unwrap_or(1) };
		let dim_b = if d < skip_b { 1 } else { b.get(d - skip_b).copied().unwrap_or(1) };
		let dim = if dim_a == dim_b {
			dim_a
		} else if dim_b == 1 {
			dim_a
		} else if dim_a == 1 {
			dim_b
		} else {
			cold_path();
			return Err(TensorOpError::shape_mismatch("broadcast", a, b));
		};
		result.push(dim);
	}
	Ok(result)
}

pub fn zip_broadcast(
	a: &Tensor,
	b: &Tensor,
	f: impl Fn(f64, f64) -> f64,
) -> Result<Tensor, ErrPack<TensorOpError>> {
	if a.shape() == b.shape() {
		return Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)));
	}
	let shape = broadcast_shapes(a.shape(), b.shape())?;
	let (Some(av), Some(bv)) = (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) else {
		cold_path();
		return Err(TensorOpError::shape_mismatch("broadcast", a.shape(), b.shape()));
	};
	Ok(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y)))
}

/// Sums `t` over the dimensions that were broadcast to get from `shape` to `t.shape()`.
///
/// This is the adjoint of broadcasting and is used to bring a gradient back to the
/// shape of a broadcast operand.
pub fn reduce_to_shape(t: &Tensor, shape: &[usize]) -> Result<Tensor, ErrPack<TensorOpError>> {
	if t.shape() == shape {
		return Ok(t.clone());
	}
	if shape.len() > t.ndim() {
		cold_path();
		return Err(TensorOpError::shape_mismatch("reduce_to_shape", t.shape(), shape));
	}
	let mut result = t.clone();
	for _ in 0..(t.ndim() - shape.len()) {
		result = result.sum_axis(Axis(0));
	}
	for (axis, &dim) in shape.iter().enumerate() {
		let current = result.shape().get(axis).copied().unwrap_or(0);
		if current != dim {
			if dim != 1 {
				cold_path();
				return Err(TensorOpError::shape_mismatch("reduce_to_shape", t.shape(), shape));
			}
			result = result.sum_axis(Axis(axis)).insert_axis(Axis(axis));
		}
	}
	Ok(result)
}

//--------------------------------------------------------------------------------------------------

pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, ErrPack<TensorOpError>> {
	let a2 = a
		.view()
		.into_dimensionality::<Ix2>()
		.map_err(|_| TensorOpError::invalid_dimensions("matmul", 2, a.ndim()))?;
	let b2 = b
		.view()
		.into_dimensionality::<Ix2>()
		.map_err(|_| TensorOpError::invalid_dimensions("matmul", 2, b.ndim()))?;
	if a2.ncols() != b2.nrows() {
		cold_path();
		return Err(TensorOpError::shape_mismatch("matmul", a.shape(), b.shape()));
	}
	Ok(a2.dot(&b2).into_dyn())
}

/// Reverses the axes. Scalars and vectors are returned unchanged.
pub fn transpose(a: &Tensor) -> Result<Tensor, ErrPack<TensorOpError>> {
	if a.ndim() > 2 {
		cold_path();
		return Err(TensorOpError::invalid_dimensions("transpose", 2, a.ndim()));
	}
	Ok(a.t().to_owned())
}

pub fn sum_axis(a: &Tensor, axis: usize) -> Result<Tensor, ErrPack<TensorOpError>> {
	if axis >= a.ndim() {
		cold_path();
		return Err(ErrPack::with_message(
			TensorOpError::NotEnoughDimensions,
			format!("sum_axis: axis {axis} out of range for {} dimensions", a.ndim()),
		));
	}
	Ok(a.sum_axis(Axis(axis)))
}

pub fn insert_axis(a: &Tensor, axis: usize) -> Result<Tensor, ErrPack<TensorOpError>> {
	if axis > a.ndim() {
		cold_path();
		return Err(ErrPack::with_message(
			TensorOpError::NotEnoughDimensions,
			format!("insert_axis: axis {axis} out of range for {} dimensions", a.ndim()),
		));
	}
	Ok(a.clone().insert_axis(Axis(axis)))
}

pub fn axis_len(a: &Tensor, axis: usize) -> Result<usize, ErrPack<TensorOpError>> {
	a.shape().get(axis).copied().ok_or_else(|| {
		ErrPack::with_message(
			TensorOpError::NotEnoughDimensions,
			format!("axis_len: axis {axis} out of range for {} dimensions", a.ndim()),
		)
	})
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
