//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::expr::{
	Expr, ExprBinaryKind, ExprKind, ExprNode, ExprUnaryKind, GraphError, RandomKind, TensorRef,
	ToExpr, node_id, topo_order,
};
use crate::random::RandomStreams;
use crate::shared::SharedVar;
use crate::tensor::{self, Tensor, TensorOpError};
use crate::util::LossyInto;
use crate::util::cold_path;
use crate::util::index_vec::IndexVec;
use crate::{ErrPack, define_index_type};

//--------------------------------------------------------------------------------------------------

define_index_type!(SlotIndex);

enum StepOp {
	Const(f64),
	Arg(usize),
	Shared(Rc<SharedVar>),
	Unary(ExprUnaryKind),
	Binary(ExprBinaryKind),
	Random(RandomKind, Rc<RandomStreams>),
}

/// One evaluation step. The step at index `i` produces the value of slot `i`.
struct Step {
	op: StepOp,
	inputs: SmallVec<[SlotIndex; 2]>,
}

/// Structural identity of a deterministic node, used to merge duplicates.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Signature {
	Const(u64),
	Arg(usize),
	Shared(usize),
	Unary(ExprUnaryKind, SlotIndex),
	Binary(ExprBinaryKind, SlotIndex, SlotIndex),
}

//--------------------------------------------------------------------------------------------------

/// Collects the pieces of a function before compiling it.
#[derive(Default)]
pub struct FunctionBuilder {
	inputs: Vec<Rc<TensorRef>>,
	outputs: Vec<Expr>,
	updates: Vec<(Rc<SharedVar>, Expr)>,
	givens: Vec<(Rc<TensorRef>, Expr)>,
}

impl FunctionBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn input(mut self, tensor_ref: &Rc<TensorRef>) -> Self {
		self.inputs.push(tensor_ref.clone());
		self
	}

	pub fn output<E: ToExpr>(mut self, expr: E) -> Self {
		self.outputs.push(expr.to_expr());
		self
	}

	/// After each call, `var` is set to the value of `expr`. All update expressions are
	/// evaluated before any variable is written.
	pub fn update<E: ToExpr>(mut self, var: &Rc<SharedVar>, expr: E) -> Self {
		self.updates.push((var.clone(), expr.to_expr()));
		self
	}

	/// Replaces every use of `tensor_ref` with `expr`.
	pub fn given<E: ToExpr>(mut self, tensor_ref: &Rc<TensorRef>, expr: E) -> Self {
		self.givens.push((tensor_ref.clone(), expr.to_expr()));
		self
	}

	pub fn compile(self) -> Result<Function, ErrPack<GraphError>> {
		Compiler::new(&self)?.compile(self)
	}
}

//--------------------------------------------------------------------------------------------------

fn ref_id(tensor_ref: &Rc<TensorRef>) -> usize {
	Rc::as_ptr(tensor_ref) as usize
}

struct Compiler {
	arg_index: HashMap<usize, usize>,
	given_index: HashMap<usize, usize>,
	steps: IndexVec<SlotIndex, Step>,
	slot_of_node: HashMap<usize, SlotIndex>,
	merged: HashMap<Signature, SlotIndex>,
	merged_count: usize,
}

impl Compiler {
	fn new(builder: &FunctionBuilder) -> Result<Self, ErrPack<GraphError>> {
		let mut arg_index = HashMap::new();
		for (i, inp) in builder.inputs.iter().enumerate() {
			if arg_index.insert(ref_id(inp), i).is_some() {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::DuplicateInput,
					format!("input {} listed more than once", inp.name),
				));
			}
		}
		let mut given_index = HashMap::new();
		for (i, (tensor_ref, expr)) in builder.givens.iter().enumerate() {
			if expr.ndim() != tensor_ref.ndim {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::DimensionMismatch,
					format!(
						"given for {}: expected {} dimensions, got {}",
						tensor_ref.name,
						tensor_ref.ndim,
						expr.ndim()
					),
				));
			}
			given_index.insert(ref_id(tensor_ref), i);
		}

		let mut seen_updates = HashSet::new();
		for (var, expr) in &builder.updates {
			let var_id = Rc::as_ptr(var) as usize;
			if !seen_updates.insert(var_id) {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::DuplicateUpdate,
					format!("shared variable {} updated more than once", var.name()),
				));
			}
			if expr.ndim() != var.ndim() {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::DimensionMismatch,
					format!(
						"update of {}: expected {} dimensions, got {}",
						var.name(),
						var.ndim(),
						expr.ndim()
					),
				));
			}
		}

		let mut errors = Vec::new();
		let roots = builder.outputs.iter().chain(builder.updates.iter().map(|(_, e)| e));
		for expr in roots.chain(builder.givens.iter().map(|(_, e)| e)) {
			if expr.have_errors() {
				errors.extend(expr.errors());
			}
		}
		if !errors.is_empty() {
			cold_path();
			return Err(GraphError::invalid_expr(&errors));
		}

		Ok(Self {
			arg_index,
			given_index,
			steps: IndexVec::new(),
			slot_of_node: HashMap::new(),
			merged: HashMap::new(),
			merged_count: 0,
		})
	}

	fn slot(&self, node: &Rc<ExprNode>) -> Result<SlotIndex, ErrPack<GraphError>> {
		self.slot_of_node.get(&node_id(node)).copied().ok_or_else(|| {
			ErrPack::with_message(GraphError::InvalidExpr, "node scheduled before its inputs")
		})
	}

	fn schedule(&mut self, roots: &[Expr], givens: &[(Rc<TensorRef>, Expr)]) -> Result<(), ErrPack<GraphError>> {
		for node in topo_order(roots) {
			let id = node_id(&node);
			if self.slot_of_node.contains_key(&id) {
				continue;
			}
			let (op, inputs, signature) = match node.kind() {
				ExprKind::Const(c) => {
					(StepOp::Const(c.value), SmallVec::new(), Some(Signature::Const(c.value.to_bits())))
				},
				ExprKind::Input(tensor_ref) => {
					if let Some(&g) = self.given_index.get(&ref_id(tensor_ref)) {
						let Some((_, given)) = givens.get(g) else {
							cold_path();
							return Err(ErrPack::new(GraphError::InvalidExpr));
						};
						let slot = self.slot(&given.node)?;
						self.slot_of_node.insert(id, slot);
						continue;
					}
					let Some(&arg) = self.arg_index.get(&ref_id(tensor_ref)) else {
						cold_path();
						return Err(ErrPack::with_message(
							GraphError::MissingInput,
							format!("input {} is needed but was not provided", tensor_ref.name),
						));
					};
					(StepOp::Arg(arg), SmallVec::new(), Some(Signature::Arg(arg)))
				},
				ExprKind::Shared(var) => {
					let var_id = Rc::as_ptr(var) as usize;
					(StepOp::Shared(var.clone()), SmallVec::new(), Some(Signature::Shared(var_id)))
				},
				ExprKind::Unary(u) => {
					let x = self.slot(&u.expr)?;
					(StepOp::Unary(u.kind), SmallVec::from_slice(&[x]), Some(Signature::Unary(u.kind, x)))
				},
				ExprKind::Binary(b) => {
					let l = self.slot(&b.lhs)?;
					let r = self.slot(&b.rhs)?;
					(
						StepOp::Binary(b.kind),
						SmallVec::from_slice(&[l, r]),
						Some(Signature::Binary(b.kind, l, r)),
					)
				},
				ExprKind::Random(r) => {
					let x = self.slot(&r.expr)?;
					(StepOp::Random(r.kind, r.streams.clone()), SmallVec::from_slice(&[x]), None)
				},
			};
			if let Some(signature) = signature {
				if let Some(&existing) = self.merged.get(&signature) {
					self.slot_of_node.insert(id, existing);
					self.merged_count += 1;
					continue;
				}
				let slot = self.steps.push(Step { op, inputs });
				self.merged.insert(signature, slot);
				self.slot_of_node.insert(id, slot);
			} else {
				let slot = self.steps.push(Step { op, inputs });
				self.slot_of_node.insert(id, slot);
			}
		}
		Ok(())
	}

	fn compile(mut self, builder: FunctionBuilder) -> Result<Function, ErrPack<GraphError>> {
		let FunctionBuilder { inputs, outputs, updates, givens } = builder;

		// givens are scheduled first so that inputs they replace can refer to them
		let given_exprs: Vec<Expr> = givens.iter().map(|(_, e)| e.clone()).collect();
		self.schedule(&given_exprs, &givens)?;

		let mut roots = outputs.clone();
		roots.extend(updates.iter().map(|(_, e)| e.clone()));
		self.schedule(&roots, &givens)?;

		let outputs =
			outputs.iter().map(|e| self.slot(&e.node)).collect::<Result<Vec<_>, _>>()?;
		let updates = updates
			.into_iter()
			.map(|(var, e)| self.slot(&e.node).map(|slot| (var, slot)))
			.collect::<Result<Vec<_>, _>>()?;

		log::debug!(
			"compiled function: {} inputs, {} steps, {} merged nodes, {} outputs, {} updates",
			inputs.len(),
			self.steps.len(),
			self.merged_count,
			outputs.len(),
			updates.len(),
		);

		Ok(Function { inputs, steps: self.steps, outputs, updates })
	}
}

//--------------------------------------------------------------------------------------------------

/// Compiled expression graph.
pub struct Function {
	inputs: Vec<Rc<TensorRef>>,
	steps: IndexVec<SlotIndex, Step>,
	outputs: Vec<SlotIndex>,
	updates: Vec<(Rc<SharedVar>, SlotIndex)>,
}

impl Function {
	pub fn num_steps(&self) -> usize {
		self.steps.len()
	}

	pub fn inputs(&self) -> &[Rc<TensorRef>] {
		&self.inputs
	}

	/// Evaluates the outputs and then applies the updates.
	pub fn call(&self, args: &[Tensor]) -> Result<Vec<Tensor>, ErrPack<TensorOpError>> {
		if args.len() != self.inputs.len() {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::InvalidArgs,
				format!("expected {} arguments, got {}", self.inputs.len(), args.len()),
			));
		}
		for (arg, inp) in args.iter().zip(&self.inputs) {
			if arg.ndim() != inp.ndim {
				cold_path();
				return Err(ErrPack::with_message(
					TensorOpError::InvalidDimensions,
					format!("argument {}: expected {} dimensions, got {}", inp.name, inp.ndim, arg.ndim()),
				));
			}
		}

		let mut values: IndexVec<SlotIndex, Tensor> = IndexVec::with_capacity(self.steps.len());
		for step in &self.steps {
			let value = eval_step(step, args, &values)?;
			values.push(value);
		}

		let outputs = self
			.outputs
			.iter()
			.map(|&slot| get_value(&values, slot).cloned())
			.collect::<Result<Vec<_>, _>>()?;

		let new_values = self
			.updates
			.iter()
			.map(|(var, slot)| get_value(&values, *slot).map(|v| (var, v.clone())))
			.collect::<Result<Vec<_>, _>>()?;
		for (var, value) in new_values {
			var.set_value(value)?;
		}

		Ok(outputs)
	}
}

fn get_value(values: &IndexVec<SlotIndex, Tensor>, slot: SlotIndex) -> Result<&Tensor, ErrPack<TensorOpError>> {
	values.get(slot).ok_or_else(|| {
		ErrPack::with_message(TensorOpError::InvalidArgs, format!("slot {} not evaluated", slot.raw))
	})
}

fn eval_step(
	step: &Step,
	args: &[Tensor],
	values: &IndexVec<SlotIndex, Tensor>,
) -> Result<Tensor, ErrPack<TensorOpError>> {
	match &step.op {
		StepOp::Const(value) => Ok(tensor::scalar(*value)),
		StepOp::Arg(i) => args.get(*i).cloned().ok_or_else(|| ErrPack::new(TensorOpError::InvalidArgs)),
		StepOp::Shared(var) => Ok(var.get_value()),
		StepOp::Unary(kind) => eval_unary(*kind, step_input(step, values, 0)?),
		StepOp::Binary(kind) => {
			eval_binary(*kind, step_input(step, values, 0)?, step_input(step, values, 1)?)
		},
		StepOp::Random(kind, streams) => Ok(streams.sample(*kind, step_input(step, values, 0)?)),
	}
}

fn step_input<'a>(
	step: &Step,
	values: &'a IndexVec<SlotIndex, Tensor>,
	i: usize,
) -> Result<&'a Tensor, ErrPack<TensorOpError>> {
	let slot = step.inputs.get(i).copied().ok_or_else(|| ErrPack::new(TensorOpError::InvalidArgs))?;
	get_value(values, slot)
}

fn sigmoid(v: f64) -> f64 {
	1.0 / (1.0 + (-v).exp())
}

fn softplus(v: f64) -> f64 {
	v.max(0.0) + (-v.abs()).exp().ln_1p()
}

fn eval_unary(kind: ExprUnaryKind, x: &Tensor) -> Result<Tensor, ErrPack<TensorOpError>> {
	let result = match kind {
		ExprUnaryKind::Neg => x.mapv(|v| -v),
		ExprUnaryKind::Exp => x.mapv(f64::exp),
		ExprUnaryKind::Ln => x.mapv(f64::ln),
		ExprUnaryKind::Square => x.mapv(|v| v * v),
		ExprUnaryKind::Sqrt => x.mapv(f64::sqrt),
		ExprUnaryKind::Sigmoid => x.mapv(sigmoid),
		ExprUnaryKind::Tanh => x.mapv(f64::tanh),
		ExprUnaryKind::Softplus => x.mapv(softplus),
		ExprUnaryKind::Rectify => x.mapv(|v| v.max(0.0)),
		ExprUnaryKind::Step => x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
		ExprUnaryKind::EqZero => x.mapv(|v| if v == 0.0 { 1.0 } else { 0.0 }),
		ExprUnaryKind::ZerosLike => Tensor::zeros(x.raw_dim()),
		ExprUnaryKind::OnesLike => Tensor::ones(x.raw_dim()),
		ExprUnaryKind::Transpose => tensor::transpose(x)?,
		ExprUnaryKind::Sum => tensor::scalar(x.sum()),
		ExprUnaryKind::Mean => tensor::scalar(x.mean().unwrap_or(f64::NAN)),
		ExprUnaryKind::SumAxis(axis) => tensor::sum_axis(x, axis)?,
		ExprUnaryKind::MeanAxis(axis) => {
			let len: f64 = tensor::axis_len(x, axis)?.lossy_into();
			tensor::sum_axis(x, axis)?.mapv(|v| v / len)
		},
		ExprUnaryKind::InsertAxis(axis) => tensor::insert_axis(x, axis)?,
		ExprUnaryKind::Size => tensor::scalar(x.len().lossy_into()),
		ExprUnaryKind::AxisLen(axis) => tensor::scalar(tensor::axis_len(x, axis)?.lossy_into()),
	};
	Ok(result)
}

fn eval_binary(kind: ExprBinaryKind, a: &Tensor, b: &Tensor) -> Result<Tensor, ErrPack<TensorOpError>> {
	match kind {
		ExprBinaryKind::Add => tensor::zip_broadcast(a, b, |x, y| x + y),
		ExprBinaryKind::Sub => tensor::zip_broadcast(a, b, |x, y| x - y),
		ExprBinaryKind::Mul => tensor::zip_broadcast(a, b, |x, y| x * y),
		ExprBinaryKind::Div => tensor::zip_broadcast(a, b, |x, y| x / y),
		ExprBinaryKind::Dot => tensor::matmul(a, b),
		ExprBinaryKind::ReduceLike => tensor::reduce_to_shape(a, b.shape()),
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
