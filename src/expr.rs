//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

#![allow(clippy::use_self)]

use std::borrow::Cow;
use std::collections::HashSet;
use std::rc::Rc;

use smallvec::SmallVec;
use thin_vec::ThinVec;

use crate::ErrPack;
use crate::random::RandomStreams;
use crate::shared::SharedVar;
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

/// Symbolic expression.
///
/// Expressions are immutable and cheap to clone. Building an expression never fails;
/// problems found while building (wrong number of dimensions, axis out of range, ...)
/// are recorded on the node and reported when the graph is compiled or differentiated.
#[derive(Clone)]
pub struct Expr {
	pub node: Rc<ExprNode>,
}

pub struct ExprNode {
	kind: ExprKind,
	ndim: usize,
	have_errors: bool,
	local_errors: ThinVec<String>,
}

impl ExprNode {
	pub fn kind(&self) -> &ExprKind {
		&self.kind
	}

	pub fn ndim(&self) -> usize {
		self.ndim
	}

	pub fn have_errors(&self) -> bool {
		self.have_errors
	}

	pub fn local_errors(&self) -> &[String] {
		&self.local_errors
	}

	pub fn inputs(&self) -> SmallVec<[&Rc<ExprNode>; 2]> {
		let mut result = SmallVec::new();
		match &self.kind {
			ExprKind::Const(_) | ExprKind::Input(_) | ExprKind::Shared(_) => {},
			ExprKind::Unary(u) => result.push(&u.expr),
			ExprKind::Binary(b) => {
				result.push(&b.lhs);
				result.push(&b.rhs);
			},
			ExprKind::Random(r) => result.push(&r.expr),
		}
		result
	}
}

pub enum ExprKind {
	Const(ExprConst),
	Input(Rc<TensorRef>),
	Shared(Rc<SharedVar>),
	Unary(ExprUnary),
	Binary(ExprBinary),
	Random(ExprRandom),
}

pub struct ExprConst {
	pub value: f64,
}

/// Placeholder for a tensor passed as an argument to a compiled function.
pub struct TensorRef {
	pub name: Cow<'static, str>,
	pub ndim: usize,
}

pub struct ExprUnary {
	pub kind: ExprUnaryKind,
	pub expr: Rc<ExprNode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExprUnaryKind {
	Neg,
	Exp,
	Ln,
	Square,
	Sqrt,
	Sigmoid,
	Tanh,
	Softplus,
	Rectify,

	/// 1.0 where the input is > 0, else 0.0
	Step,
	/// 1.0 where the input is == 0, else 0.0
	EqZero,
	ZerosLike,
	OnesLike,

	Transpose,

	Sum,
	Mean,
	SumAxis(usize),
	MeanAxis(usize),
	InsertAxis(usize),

	/// number of elements, as a scalar
	Size,
	/// length of one axis, as a scalar
	AxisLen(usize),
}

pub struct ExprBinary {
	pub kind: ExprBinaryKind,
	pub lhs: Rc<ExprNode>,
	pub rhs: Rc<ExprNode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExprBinaryKind {
	Add,
	Sub,
	Mul,
	Div,

	/// Matrix product of two 2-d operands
	Dot,

	/// Sums `lhs` over broadcast dimensions so it gets the shape of `rhs`.
	/// The value of `rhs` is only used for its shape.
	ReduceLike,
}

pub struct ExprRandom {
	pub kind: RandomKind,
	pub expr: Rc<ExprNode>,
	pub streams: Rc<RandomStreams>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RandomKind {
	/// ones with probability `p`, shaped like the input
	BinomialMask { p: f64 },
	/// one sample per element, the input gives the probability of 1.0
	Bernoulli,
	/// normal noise with standard deviation `std`, shaped like the input
	Normal { std: f64 },
}

//--------------------------------------------------------------------------------------------------

pub trait ToExpr {
	fn to_expr(self) -> Expr;
}

impl ToExpr for Expr {
	fn to_expr(self) -> Expr {
		self
	}
}

impl ToExpr for &Expr {
	fn to_expr(self) -> Expr {
		self.clone()
	}
}

impl ToExpr for &Rc<TensorRef> {
	fn to_expr(self) -> Expr {
		Expr::new_input(self.clone())
	}
}

impl ToExpr for &Rc<SharedVar> {
	fn to_expr(self) -> Expr {
		Expr::new_shared(self.clone())
	}
}

impl ToExpr for f64 {
	fn to_expr(self) -> Expr {
		Expr::new_const(self)
	}
}

impl TensorRef {
	pub fn new<S: Into<Cow<'static, str>>>(name: S, ndim: usize) -> Rc<TensorRef> {
		Rc::new(TensorRef { name: name.into(), ndim })
	}

	/// A 2-d input, one example per row.
	pub fn matrix<S: Into<Cow<'static, str>>>(name: S) -> Rc<TensorRef> {
		Self::new(name, 2)
	}
}

//--------------------------------------------------------------------------------------------------

impl Expr {
	fn new_node(kind: ExprKind, ndim: usize, inherited_errors: bool, local_errors: ThinVec<String>) -> Expr {
		Expr {
			node: Rc::new(ExprNode {
				kind,
				ndim,
				have_errors: inherited_errors || !local_errors.is_empty(),
				local_errors,
			}),
		}
	}

	pub fn from_node(node: &Rc<ExprNode>) -> Expr {
		Expr { node: node.clone() }
	}

	pub fn new_const(value: f64) -> Expr {
		Self::new_node(ExprKind::Const(ExprConst { value }), 0, false, ThinVec::new())
	}

	pub fn new_input(tensor_ref: Rc<TensorRef>) -> Expr {
		let ndim = tensor_ref.ndim;
		Self::new_node(ExprKind::Input(tensor_ref), ndim, false, ThinVec::new())
	}

	pub fn new_shared(var: Rc<SharedVar>) -> Expr {
		let ndim = var.ndim();
		Self::new_node(ExprKind::Shared(var), ndim, false, ThinVec::new())
	}

	pub fn new_random(kind: RandomKind, like: Expr, streams: Rc<RandomStreams>) -> Expr {
		let mut local_errors = ThinVec::new();
		match kind {
			RandomKind::BinomialMask { p } if !(0.0..=1.0).contains(&p) => {
				cold_path();
				local_errors.push(format!("binomial: probability {p} not in [0, 1]"));
			},
			RandomKind::Normal { std } if std < 0.0 => {
				cold_path();
				local_errors.push(format!("normal: negative standard deviation {std}"));
			},
			_ => {},
		}
		let ndim = like.node.ndim;
		let have_errors = like.node.have_errors;
		Self::new_node(
			ExprKind::Random(ExprRandom { kind, expr: like.node, streams }),
			ndim,
			have_errors,
			local_errors,
		)
	}

	/// Identity of the node. Two clones of the same expression have the same id.
	pub fn id(&self) -> usize {
		node_id(&self.node)
	}

	pub fn ndim(&self) -> usize {
		self.node.ndim
	}

	pub fn kind(&self) -> &ExprKind {
		&self.node.kind
	}

	pub fn have_errors(&self) -> bool {
		self.node.have_errors
	}

	/// All errors recorded anywhere in the graph of this expression.
	pub fn errors(&self) -> Vec<String> {
		let mut result = Vec::new();
		if !self.node.have_errors {
			return result;
		}
		for node in topo_order(std::slice::from_ref(self)) {
			result.extend(node.local_errors.iter().cloned());
		}
		result
	}

	pub fn is_const(&self, value: f64) -> bool {
		matches!(&self.node.kind, ExprKind::Const(c) if c.value == value)
	}

	//----------------------------------------------------------------------------------------------

	fn __unary(self, kind: ExprUnaryKind) -> Expr {
		let mut local_errors = ThinVec::new();
		let in_ndim = self.node.ndim;
		let ndim = match kind {
			ExprUnaryKind::Transpose => {
				if in_ndim > 2 {
					cold_path();
					local_errors.push(format!("transpose: expected at most 2 dimensions, got {in_ndim}"));
				}
				in_ndim
			},
			ExprUnaryKind::Sum | ExprUnaryKind::Mean | ExprUnaryKind::Size => 0,
			ExprUnaryKind::AxisLen(axis) => {
				if axis >= in_ndim {
					cold_path();
					local_errors.push(format!("axis_len: axis {axis} out of range ({in_ndim} dimensions)"));
				}
				0
			},
			ExprUnaryKind::SumAxis(axis) | ExprUnaryKind::MeanAxis(axis) => {
				if axis >= in_ndim {
					cold_path();
					local_errors.push(format!("reduce: axis {axis} out of range ({in_ndim} dimensions)"));
				}
				in_ndim.saturating_sub(1)
			},
			ExprUnaryKind::InsertAxis(axis) => {
				if axis > in_ndim {
					cold_path();
					local_errors.push(format!("insert_axis: axis {axis} out of range ({in_ndim} dimensions)"));
				}
				in_ndim + 1
			},
			_ => in_ndim,
		};
		let have_errors = self.node.have_errors;
		Self::new_node(
			ExprKind::Unary(ExprUnary { kind, expr: self.node }),
			ndim,
			have_errors,
			local_errors,
		)
	}

	pub fn exp(self) -> Expr {
		self.__unary(ExprUnaryKind::Exp)
	}

	pub fn ln(self) -> Expr {
		self.__unary(ExprUnaryKind::Ln)
	}

	pub fn square(self) -> Expr {
		self.__unary(ExprUnaryKind::Square)
	}

	pub fn sqrt(self) -> Expr {
		self.__unary(ExprUnaryKind::Sqrt)
	}

	pub fn sigmoid(self) -> Expr {
		self.__unary(ExprUnaryKind::Sigmoid)
	}

	pub fn tanh(self) -> Expr {
		self.__unary(ExprUnaryKind::Tanh)
	}

	pub fn softplus(self) -> Expr {
		self.__unary(ExprUnaryKind::Softplus)
	}

	pub fn rectify(self) -> Expr {
		self.__unary(ExprUnaryKind::Rectify)
	}

	pub fn step(self) -> Expr {
		self.__unary(ExprUnaryKind::Step)
	}

	pub fn eq_zero(self) -> Expr {
		self.__unary(ExprUnaryKind::EqZero)
	}

	pub fn zeros_like(self) -> Expr {
		self.__unary(ExprUnaryKind::ZerosLike)
	}

	pub fn ones_like(self) -> Expr {
		self.__unary(ExprUnaryKind::OnesLike)
	}

	pub fn T(self) -> Expr {
		self.__unary(ExprUnaryKind::Transpose)
	}

	pub fn sum(self) -> Expr {
		self.__unary(ExprUnaryKind::Sum)
	}

	pub fn mean(self) -> Expr {
		self.__unary(ExprUnaryKind::Mean)
	}

	pub fn sum_axis(self, axis: usize) -> Expr {
		self.__unary(ExprUnaryKind::SumAxis(axis))
	}

	pub fn mean_axis(self, axis: usize) -> Expr {
		self.__unary(ExprUnaryKind::MeanAxis(axis))
	}

	pub fn insert_axis(self, axis: usize) -> Expr {
		self.__unary(ExprUnaryKind::InsertAxis(axis))
	}

	pub fn size(self) -> Expr {
		self.__unary(ExprUnaryKind::Size)
	}

	pub fn axis_len(self, axis: usize) -> Expr {
		self.__unary(ExprUnaryKind::AxisLen(axis))
	}

	//----------------------------------------------------------------------------------------------

	fn __binary_op(self, kind: ExprBinaryKind, rhs: Expr) -> Expr {
		let mut local_errors = ThinVec::new();
		let l_ndim = self.node.ndim;
		let r_ndim = rhs.node.ndim;
		let ndim = match kind {
			ExprBinaryKind::Dot => {
				if l_ndim != 2 || r_ndim != 2 {
					cold_path();
					local_errors.push(format!(
						"dot: expected two 2-d operands, got {l_ndim} and {r_ndim} dimensions"
					));
				}
				2
			},
			ExprBinaryKind::ReduceLike => {
				if r_ndim > l_ndim {
					cold_path();
					local_errors.push(format!(
						"reduce_like: cannot reduce {l_ndim} dimensions to {r_ndim}"
					));
				}
				r_ndim
			},
			_ => l_ndim.max(r_ndim),
		};
		let have_errors = self.node.have_errors || rhs.node.have_errors;
		Self::new_node(
			ExprKind::Binary(ExprBinary { kind, lhs: self.node, rhs: rhs.node }),
			ndim,
			have_errors,
			local_errors,
		)
	}

	pub fn dot(self, rhs: Expr) -> Expr {
		self.__binary_op(ExprBinaryKind::Dot, rhs)
	}

	pub fn reduce_like(self, like: Expr) -> Expr {
		self.__binary_op(ExprBinaryKind::ReduceLike, like)
	}
}

//--------------------------------------------------------------------------------------------------

impl std::ops::Add for Expr {
	type Output = Expr;

	fn add(self, rhs: Expr) -> Expr {
		self.__binary_op(ExprBinaryKind::Add, rhs)
	}
}

impl std::ops::Sub for Expr {
	type Output = Expr;

	fn sub(self, rhs: Expr) -> Expr {
		self.__binary_op(ExprBinaryKind::Sub, rhs)
	}
}

impl std::ops::Mul for Expr {
	type Output = Expr;

	fn mul(self, rhs: Expr) -> Expr {
		self.__binary_op(ExprBinaryKind::Mul, rhs)
	}
}

impl std::ops::Div for Expr {
	type Output = Expr;

	fn div(self, rhs: Expr) -> Expr {
		self.__binary_op(ExprBinaryKind::Div, rhs)
	}
}

impl std::ops::Add<f64> for Expr {
	type Output = Expr;

	fn add(self, rhs: f64) -> Expr {
		self + Expr::new_const(rhs)
	}
}

impl std::ops::Sub<f64> for Expr {
	type Output = Expr;

	fn sub(self, rhs: f64) -> Expr {
		self - Expr::new_const(rhs)
	}
}

impl std::ops::Mul<f64> for Expr {
	type Output = Expr;

	fn mul(self, rhs: f64) -> Expr {
		self * Expr::new_const(rhs)
	}
}

impl std::ops::Div<f64> for Expr {
	type Output = Expr;

	fn div(self, rhs: f64) -> Expr {
		self / Expr::new_const(rhs)
	}
}

impl std::ops::Sub<Expr> for f64 {
	type Output = Expr;

	fn sub(self, rhs: Expr) -> Expr {
		Expr::new_const(self) - rhs
	}
}

impl std::ops::Neg for Expr {
	type Output = Expr;

	fn neg(self) -> Expr {
		self.__unary(ExprUnaryKind::Neg)
	}
}

impl std::fmt::Debug for Expr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match &self.node.kind {
			ExprKind::Const(c) => write!(f, "Const({})", c.value),
			ExprKind::Input(r) => write!(f, "Input({})", r.name),
			ExprKind::Shared(s) => write!(f, "Shared({})", s.name()),
			ExprKind::Unary(u) => write!(f, "{:?}({:?})", u.kind, Expr::from_node(&u.expr)),
			ExprKind::Binary(b) => write!(
				f,
				"{:?}({:?}, {:?})",
				b.kind,
				Expr::from_node(&b.lhs),
				Expr::from_node(&b.rhs)
			),
			ExprKind::Random(r) => write!(f, "{:?}({:?})", r.kind, Expr::from_node(&r.expr)),
		}
	}
}

//--------------------------------------------------------------------------------------------------

pub fn node_id(node: &Rc<ExprNode>) -> usize {
	Rc::as_ptr(node) as usize
}

/// Returns every node reachable from `roots`, each exactly once, with inputs always
/// before the nodes that use them.
pub fn topo_order(roots: &[Expr]) -> Vec<Rc<ExprNode>> {
	let mut order = Vec::new();
	let mut visited = HashSet::new();
	// (node, inputs_pushed)
	let mut stack: Vec<(Rc<ExprNode>, bool)> = Vec::new();
	for root in roots.iter().rev() {
		stack.push((root.node.clone(), false));
	}
	while let Some((node, inputs_pushed)) = stack.pop() {
		let id = node_id(&node);
		if inputs_pushed {
			if visited.insert(id) {
				order.push(node);
			}
			continue;
		}
		if visited.contains(&id) {
			continue;
		}
		let inputs: SmallVec<[Rc<ExprNode>; 2]> = node.inputs().into_iter().cloned().collect();
		stack.push((node, true));
		for inp in inputs.into_iter().rev() {
			if !visited.contains(&node_id(&inp)) {
				stack.push((inp, false));
			}
		}
	}
	order
}

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
	InvalidExpr,
	MissingInput,
	DuplicateInput,
	DuplicateUpdate,
	NotScalar,
	DimensionMismatch,
	Eval,
}

impl GraphError {
	#[cold]
	#[inline(never)]
	pub fn invalid_expr(errors: &[String]) -> ErrPack<Self> {
		ErrPack::with_message(Self::InvalidExpr, errors.join("; "))
	}
}

impl From<ErrPack<crate::tensor::TensorOpError>> for ErrPack<GraphError> {
	#[cold]
	#[inline(never)]
	fn from(err: ErrPack<crate::tensor::TensorOpError>) -> Self {
		ErrPack::wrap(GraphError::Eval, err)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tensor;

	#[test]
	fn ndim_is_tracked() {
		let x = TensorRef::matrix("x").to_expr();
		let b = SharedVar::new("b", tensor::zeros(&[3])).to_expr();
		assert_eq!((x.clone() + b.clone()).ndim(), 2);
		assert_eq!(x.clone().sum().ndim(), 0);
		assert_eq!(x.clone().sum_axis(1).ndim(), 1);
		assert_eq!(b.insert_axis(0).ndim(), 2);
		assert_eq!((1.0 - x).ndim(), 2);
	}

	#[test]
	fn errors_are_recorded_not_raised() {
		let x = TensorRef::matrix("x").to_expr();
		let v = SharedVar::new("v", tensor::zeros(&[3])).to_expr();
		let bad = x.clone().dot(v);
		assert!(bad.have_errors());
		let downstream = (bad + x).sigmoid().sum();
		assert!(downstream.have_errors());
		let errors = downstream.errors();
		assert_eq!(errors.len(), 1);
		assert!(errors[0].contains("dot"));
	}

	#[test]
	fn topo_order_visits_shared_nodes_once() {
		let x = TensorRef::matrix("x").to_expr();
		let h = x.clone().sigmoid();
		let y = h.clone() * h.clone() + h;
		let order = topo_order(&[y.clone()]);
		// x, sigmoid, mul, add
		assert_eq!(order.len(), 4);
		assert_eq!(node_id(&order[0]), x.id());
		assert_eq!(node_id(order.last().unwrap()), y.id());
	}
}

//--------------------------------------------------------------------------------------------------
