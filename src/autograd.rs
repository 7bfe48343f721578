//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Symbolic reverse mode differentiation.
//!
//! The gradient of a scalar expression is built as another expression graph, so it
//! can be compiled together with the forward pass and the parameter updates.

use std::collections::HashMap;
use std::rc::Rc;

use bit_set::BitSet;

use crate::ErrPack;
use crate::expr::{
	Expr, ExprBinaryKind, ExprKind, ExprNode, ExprUnaryKind, GraphError, node_id, topo_order,
};
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

struct Autograd {
	position: HashMap<usize, usize>,
	/// nodes whose value depends on at least one of the `wrt` expressions
	depends: BitSet,
	adjoints: Vec<Option<Expr>>,
}

impl Autograd {
	fn add_grad(&mut self, node: &Rc<ExprNode>, grad: Expr) {
		let Some(&i) = self.position.get(&node_id(node)) else {
			return;
		};
		if !self.depends.contains(i) {
			return;
		}
		if let Some(slot) = self.adjoints.get_mut(i) {
			*slot = Some(match slot.take() {
				Some(prev) => prev + grad,
				None => grad,
			});
		}
	}
}

// `g * x`, without the multiplication when `g` is the seed 1.0
fn scale(g: Expr, x: Expr) -> Expr {
	if g.is_const(1.0) { x } else { g * x }
}

fn backward(node: &Rc<ExprNode>, g: Expr, autograd: &mut Autograd) {
	let out = Expr::from_node(node);
	match node.kind() {
		ExprKind::Const(_) | ExprKind::Input(_) | ExprKind::Shared(_) => {},

		// samples are treated as constants
		ExprKind::Random(_) => {},

		ExprKind::Unary(u) => {
			let x = Expr::from_node(&u.expr);
			let d_x = match u.kind {
				ExprUnaryKind::Neg => -g,
				ExprUnaryKind::Exp => scale(g, out),
				ExprUnaryKind::Ln => g / x,
				ExprUnaryKind::Square => scale(g, x * 2.0),
				ExprUnaryKind::Sqrt => (g * 0.5) / out,
				ExprUnaryKind::Sigmoid => scale(g, out.clone() * (1.0 - out)),
				ExprUnaryKind::Tanh => scale(g, 1.0 - out.square()),
				ExprUnaryKind::Softplus => scale(g, x.sigmoid()),
				ExprUnaryKind::Rectify => scale(g, x.step()),
				ExprUnaryKind::Step
				| ExprUnaryKind::EqZero
				| ExprUnaryKind::ZerosLike
				| ExprUnaryKind::OnesLike
				| ExprUnaryKind::Size
				| ExprUnaryKind::AxisLen(_) => return,
				ExprUnaryKind::Transpose => g.T(),
				ExprUnaryKind::Sum => scale(g, x.ones_like()),
				ExprUnaryKind::Mean => scale(g, x.clone().ones_like()) / x.size(),
				ExprUnaryKind::SumAxis(axis) => g.insert_axis(axis) * x.ones_like(),
				ExprUnaryKind::MeanAxis(axis) => {
					(g.insert_axis(axis) * x.clone().ones_like()) / x.axis_len(axis)
				},
				ExprUnaryKind::InsertAxis(axis) => g.sum_axis(axis),
			};
			autograd.add_grad(&u.expr, d_x);
		},

		ExprKind::Binary(b) => {
			let lhs = Expr::from_node(&b.lhs);
			let rhs = Expr::from_node(&b.rhs);
			match b.kind {
				ExprBinaryKind::Add => {
					autograd.add_grad(&b.lhs, g.clone().reduce_like(lhs));
					autograd.add_grad(&b.rhs, g.reduce_like(rhs));
				},
				ExprBinaryKind::Sub => {
					autograd.add_grad(&b.lhs, g.clone().reduce_like(lhs));
					autograd.add_grad(&b.rhs, (-g).reduce_like(rhs));
				},
				ExprBinaryKind::Mul => {
					autograd.add_grad(&b.lhs, scale(g.clone(), rhs.clone()).reduce_like(lhs.clone()));
					autograd.add_grad(&b.rhs, scale(g, lhs).reduce_like(rhs));
				},
				ExprBinaryKind::Div => {
					autograd.add_grad(&b.lhs, (g.clone() / rhs.clone()).reduce_like(lhs));
					autograd.add_grad(&b.rhs, (-scale(g, out) / rhs.clone()).reduce_like(rhs));
				},
				ExprBinaryKind::Dot => {
					autograd.add_grad(&b.lhs, g.clone().dot(rhs.T()));
					autograd.add_grad(&b.rhs, lhs.T().dot(g));
				},
				ExprBinaryKind::ReduceLike => {
					autograd.add_grad(&b.lhs, g * lhs.ones_like());
				},
			}
		},
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum LeafKey {
	Node(usize),
	Shared(usize),
	Input(usize),
}

// Every `to_expr()` creates a new node, so shared variables and inputs are
// identified by the variable or placeholder they read.
fn leaf_key(node: &Rc<ExprNode>) -> LeafKey {
	match node.kind() {
		ExprKind::Shared(var) => LeafKey::Shared(Rc::as_ptr(var) as usize),
		ExprKind::Input(tensor_ref) => LeafKey::Input(Rc::as_ptr(tensor_ref) as usize),
		_ => LeafKey::Node(node_id(node)),
	}
}

/// Gradients of the scalar expression `cost` with respect to each of `wrt`.
///
/// A shared variable or input in `wrt` matches every node in `cost` that reads it,
/// and the gradients of those nodes are summed.
/// An element of `wrt` that `cost` does not depend on gets a zero gradient.
pub fn grad(cost: &Expr, wrt: &[Expr]) -> Result<Vec<Expr>, ErrPack<GraphError>> {
	if cost.have_errors() {
		cold_path();
		return Err(GraphError::invalid_expr(&cost.errors()));
	}
	if cost.ndim() != 0 {
		cold_path();
		return Err(ErrPack::with_message(
			GraphError::NotScalar,
			format!("grad: cost must be a scalar, got {} dimensions", cost.ndim()),
		));
	}

	let order = topo_order(std::slice::from_ref(cost));
	let position: HashMap<usize, usize> =
		order.iter().enumerate().map(|(i, node)| (node_id(node), i)).collect();

	let mut occurrences: HashMap<LeafKey, Vec<usize>> =
		wrt.iter().map(|w| (leaf_key(&w.node), Vec::new())).collect();
	let mut depends = BitSet::with_capacity(order.len());
	for (i, node) in order.iter().enumerate() {
		if let Some(found) = occurrences.get_mut(&leaf_key(node)) {
			found.push(i);
			depends.insert(i);
			continue;
		}
		let any_input = node.inputs().iter().any(|inp| {
			position.get(&node_id(inp)).is_some_and(|&j| depends.contains(j))
		});
		if any_input {
			depends.insert(i);
		}
	}

	let mut autograd = Autograd {
		position,
		depends,
		adjoints: vec![None; order.len()],
	};
	if let Some(seed) = autograd.adjoints.last_mut() {
		*seed = Some(Expr::new_const(1.0));
	}

	for (i, node) in order.iter().enumerate().rev() {
		if !autograd.depends.contains(i) {
			continue;
		}
		let Some(g) = autograd.adjoints.get(i).cloned().flatten() else {
			continue;
		};
		backward(node, g, &mut autograd);
	}

	let result = wrt
		.iter()
		.map(|w| {
			let found = occurrences.get(&leaf_key(&w.node)).map(Vec::as_slice).unwrap_or(&[]);
			let adjoint = found
				.iter()
				.filter_map(|&i| autograd.adjoints.get(i).cloned().flatten())
				.reduce(|acc, g| acc + g);
			adjoint.unwrap_or_else(|| {
				log::debug!("grad: cost does not depend on {w:?}, using zero gradient");
				w.clone().zeros_like()
			})
		})
		.collect();
	Ok(result)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::expr::{TensorRef, ToExpr};
	use crate::function::FunctionBuilder;
	use crate::shared::SharedVar;
	use crate::tensor::{self, Tensor};
	use assert_approx_eq::assert_approx_eq;

	fn eval_scalar(cost: &Expr, x_ref: &Rc<TensorRef>, x: &Tensor) -> f64 {
		let f = FunctionBuilder::new().input(x_ref).output(cost.clone()).compile().unwrap();
		let out = f.call(&[x.clone()]).unwrap();
		tensor::to_scalar(&out[0]).unwrap()
	}

	#[test]
	fn gradient_matches_finite_differences() {
		let x_ref = TensorRef::matrix("x");
		let w = SharedVar::new(
			"w",
			tensor::from_rows(&[&[0.1, -0.2], &[0.3, 0.05], &[-0.15, 0.25]]).unwrap(),
		);
		let b = SharedVar::new("b", tensor::from_vec(&[2], vec![0.01, -0.02]).unwrap());
		let x = tensor::from_rows(&[&[1.0, 0.0, 1.0], &[0.5, 0.2, -0.3]]).unwrap();

		let h = (x_ref.to_expr().dot(w.to_expr()) + b.to_expr()).tanh();
		let cost = (h.square().sum_axis(1) + 1.0).ln().mean();

		let grads = grad(&cost, &[w.to_expr(), b.to_expr()]).unwrap();
		let f = FunctionBuilder::new()
			.input(&x_ref)
			.output(grads[0].clone())
			.output(grads[1].clone())
			.compile()
			.unwrap();
		let out = f.call(&[x.clone()]).unwrap();
		assert_eq!(out[0].shape(), &[3, 2]);
		assert_eq!(out[1].shape(), &[2]);

		let eps = 1e-6;
		for (param, g) in [(&w, &out[0]), (&b, &out[1])] {
			let orig = param.get_value();
			for (idx, &analytic) in g.indexed_iter() {
				let mut plus = orig.clone();
				plus[&idx] += eps;
				param.set_value(plus).unwrap();
				let f_plus = eval_scalar(&cost, &x_ref, &x);
				let mut minus = orig.clone();
				minus[&idx] -= eps;
				param.set_value(minus).unwrap();
				let f_minus = eval_scalar(&cost, &x_ref, &x);
				param.set_value(orig.clone()).unwrap();
				assert_approx_eq!(analytic, (f_plus - f_minus) / (2.0 * eps), 1e-5);
			}
		}
	}

	#[test]
	fn shared_var_gradient_found_through_new_expr() {
		let x_ref = TensorRef::matrix("x");
		let w = SharedVar::new("w", tensor::from_rows(&[&[0.5], &[0.25]]).unwrap());
		let cost = x_ref.to_expr().dot(w.to_expr()).sum();
		let grads = grad(&cost, &[w.to_expr()]).unwrap();
		let f = FunctionBuilder::new().input(&x_ref).output(grads[0].clone()).compile().unwrap();
		let out = f.call(&[tensor::from_rows(&[&[1.0, 2.0]]).unwrap()]).unwrap();
		assert_eq!(out[0].iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0]);
	}

	#[test]
	fn gradients_of_every_read_are_summed() {
		// the same weights used twice, as a tied autoencoder does for encode and decode
		let x_ref = TensorRef::matrix("x");
		let w = SharedVar::new("w", tensor::from_rows(&[&[0.5, -1.0], &[0.25, 2.0]]).unwrap());
		let h = x_ref.to_expr().dot(w.to_expr());
		let z = h.dot(w.to_expr().T());
		let cost = z.sum();
		let grads = grad(&cost, &[w.to_expr()]).unwrap();
		let f = FunctionBuilder::new().input(&x_ref).output(grads[0].clone()).compile().unwrap();
		let x = tensor::from_rows(&[&[1.0, 2.0]]).unwrap();
		let out = f.call(&[x]).unwrap();

		// cost = sum_ij x_i W_ik W_jk, so dcost/dW_ab = x_a * sum_j W_jb + sum_i x_i W_ib
		let w_val = w.get_value();
		let xs = [1.0, 2.0];
		for a in 0..2 {
			for b in 0..2 {
				let col_sum: f64 = (0..2).map(|j| w_val[[j, b]]).sum();
				let x_dot_col: f64 = (0..2).map(|i| xs[i] * w_val[[i, b]]).sum();
				assert_approx_eq!(out[0][[a, b]], xs[a] * col_sum + x_dot_col);
			}
		}
	}

	#[test]
	fn disconnected_gets_zero_gradient() {
		let x_ref = TensorRef::matrix("x");
		let unused = SharedVar::new("unused", tensor::zeros(&[2, 2]));
		let cost = x_ref.to_expr().sum();
		let grads = grad(&cost, &[unused.to_expr()]).unwrap();
		let f = FunctionBuilder::new().output(grads[0].clone()).compile().unwrap();
		let out = f.call(&[]).unwrap();
		assert_eq!(out[0].shape(), &[2, 2]);
		assert!(out[0].iter().all(|&v| v == 0.0));
	}

	#[test]
	fn random_nodes_block_gradient() {
		let streams = crate::random::RandomStreams::new(3);
		let p = SharedVar::new("p", tensor::from_vec(&[3], vec![0.2, 0.5, 0.9]).unwrap());
		let sample = streams.binomial(p.to_expr());
		let cost = (sample * p.to_expr()).sum();
		let grads = grad(&cost, &[p.to_expr()]).unwrap();
		let f = FunctionBuilder::new()
			.output(grads[0].clone())
			.output(cost)
			.compile()
			.unwrap();
		let out = f.call(&[]).unwrap();
		// d/dp (s * p) = s, where s is the sample drawn in the same call
		let p_val = p.get_value();
		let cost_val = tensor::to_scalar(&out[1]).unwrap();
		let recomputed: f64 = out[0].iter().zip(p_val.iter()).map(|(s, p)| s * p).sum();
		assert_approx_eq!(cost_val, recomputed);
		assert!(out[0].iter().all(|&s| s == 0.0 || s == 1.0));
	}

	#[test]
	fn cost_must_be_scalar() {
		let x_ref = TensorRef::matrix("x");
		let err = grad(&x_ref.to_expr().sigmoid(), &[]).unwrap_err();
		assert_eq!(err.code, GraphError::NotScalar);
	}
}

//--------------------------------------------------------------------------------------------------
