//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use crate::ErrPack;
use crate::tensor::{Tensor, TensorOpError};
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

/// Named mutable tensor that expressions can reference.
///
/// The graph holds the variable, not its value, so a compiled function always sees
/// the value the variable has at the time of the call. The number of dimensions
/// is fixed when the variable is created.
pub struct SharedVar {
	name: Cow<'static, str>,
	ndim: usize,
	value: RefCell<Tensor>,
}

impl SharedVar {
	pub fn new<S: Into<Cow<'static, str>>>(name: S, value: Tensor) -> Rc<Self> {
		Rc::new(Self {
			name: name.into(),
			ndim: value.ndim(),
			value: RefCell::new(value),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn ndim(&self) -> usize {
		self.ndim
	}

	pub fn shape(&self) -> Vec<usize> {
		self.value.borrow().shape().to_vec()
	}

	pub fn get_value(&self) -> Tensor {
		self.value.borrow().clone()
	}

	pub fn with_value<R>(&self, f: impl FnOnce(&Tensor) -> R) -> R {
		f(&self.value.borrow())
	}

	pub fn set_value(&self, value: Tensor) -> Result<(), ErrPack<TensorOpError>> {
		if value.ndim() != self.ndim {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::InvalidDimensions,
				format!(
					"shared variable {}: expected {} dimensions, got {}",
					self.name,
					self.ndim,
					value.ndim()
				),
			));
		}
		*self.value.borrow_mut() = value;
		Ok(())
	}
}

impl std::fmt::Debug for SharedVar {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "SharedVar({}, {:?})", self.name, self.value.borrow().shape())
	}
}

//--------------------------------------------------------------------------------------------------
