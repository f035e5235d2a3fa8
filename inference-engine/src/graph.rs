//! Resolved computation graph and its evaluator.
//!
//! Nodes are stored in declaration order, which is also a valid evaluation
//! order since a node may only reference nodes declared before it. Shapes
//! and dtypes are checked once at build time.

use std::collections::HashMap;

use ndarray::{Array1, Array2, Axis};

use crate::checkpoint::{DType, GraphDef, OpDef, ParamDef, Params};
use crate::error::{InferenceError, LoadError};

/// Static type of a node's output. Float tensors are `[batch, width]`,
/// int tensors are `[batch]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Float(usize),
    Int,
}

#[derive(Debug, Clone)]
pub(crate) enum Tensor {
    Float(Array2<f64>),
    Int(Array1<i64>),
}

#[derive(Debug)]
enum Op {
    Placeholder,
    Dense {
        input: usize,
        weights: Array2<f64>,
        bias: Array1<f64>,
    },
    Relu(usize),
    Sigmoid(usize),
    Tanh(usize),
    Softmax(usize),
    Identity(usize),
}

impl Op {
    const fn input(&self) -> Option<usize> {
        match self {
            Self::Placeholder => None,
            Self::Dense { input, .. }
            | Self::Relu(input)
            | Self::Sigmoid(input)
            | Self::Tanh(input)
            | Self::Softmax(input)
            | Self::Identity(input) => Some(*input),
        }
    }
}

#[derive(Debug)]
struct Node {
    name: String,
    op: Op,
    kind: Kind,
}

#[derive(Debug)]
pub(crate) struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Graph {
    pub(crate) fn build(def: GraphDef, params: &Params) -> Result<Self, LoadError> {
        let mut graph = Self {
            nodes: Vec::with_capacity(def.nodes.len()),
            index: HashMap::with_capacity(def.nodes.len()),
        };

        for node in def.nodes {
            if graph.index.contains_key(&node.name) {
                return Err(LoadError::InvalidGraph(format!(
                    "duplicate node name {}",
                    node.name
                )));
            }

            let (op, kind) = match node.op {
                OpDef::Placeholder { dtype, width } => match (dtype, width) {
                    (DType::Float, Some(width)) if width > 0 => (Op::Placeholder, Kind::Float(width)),
                    (DType::Float, _) => {
                        return Err(LoadError::InvalidGraph(format!(
                            "float placeholder {} needs a positive width",
                            node.name
                        )))
                    }
                    (DType::Int, _) => (Op::Placeholder, Kind::Int),
                },
                OpDef::Dense {
                    input,
                    weights,
                    bias,
                } => {
                    let (input, in_width) = graph.float_input(&node.name, &input)?;
                    let weights = matrix(params, &weights, in_width)?;
                    let out_width = weights.ncols();
                    let bias = vector(params, &bias, out_width)?;
                    (
                        Op::Dense {
                            input,
                            weights,
                            bias,
                        },
                        Kind::Float(out_width),
                    )
                }
                OpDef::Relu { input } => graph.activation(&node.name, &input, Op::Relu)?,
                OpDef::Sigmoid { input } => graph.activation(&node.name, &input, Op::Sigmoid)?,
                OpDef::Tanh { input } => graph.activation(&node.name, &input, Op::Tanh)?,
                OpDef::Softmax { input } => graph.activation(&node.name, &input, Op::Softmax)?,
                OpDef::Identity { input } => {
                    let input = graph.resolve_input(&node.name, &input)?;
                    (Op::Identity(input), graph.nodes[input].kind)
                }
            };

            graph.index.insert(node.name.clone(), graph.nodes.len());
            graph.nodes.push(Node {
                name: node.name,
                op,
                kind,
            });
        }

        Ok(graph)
    }

    /// Look up a tensor by name, with or without its `:0` suffix.
    pub(crate) fn lookup(&self, tensor: &str) -> Result<usize, LoadError> {
        node_name(tensor)
            .and_then(|name| self.index.get(name).copied())
            .ok_or_else(|| LoadError::UnknownTensor(tensor.to_string()))
    }

    pub(crate) fn kind(&self, node: usize) -> Kind {
        self.nodes[node].kind
    }

    pub(crate) fn is_placeholder(&self, node: usize) -> bool {
        matches!(self.nodes[node].op, Op::Placeholder)
    }

    pub(crate) fn name(&self, node: usize) -> &str {
        &self.nodes[node].name
    }

    /// Evaluate only the nodes the fetches depend on.
    pub(crate) fn run(
        &self,
        feeds: &[(usize, Tensor)],
        fetches: &[usize],
    ) -> Result<Vec<Tensor>, InferenceError> {
        let mut needed = vec![false; self.nodes.len()];
        for &fetch in fetches {
            needed[fetch] = true;
        }
        for idx in (0..self.nodes.len()).rev() {
            if needed[idx] {
                if let Some(input) = self.nodes[idx].op.input() {
                    needed[input] = true;
                }
            }
        }

        let mut values: Vec<Option<Tensor>> = (0..self.nodes.len()).map(|_| None).collect();
        for (idx, node) in self.nodes.iter().enumerate() {
            if !needed[idx] {
                continue;
            }
            let value = match &node.op {
                Op::Placeholder => feeds
                    .iter()
                    .find(|(fed, _)| *fed == idx)
                    .map(|(_, tensor)| tensor.clone())
                    .ok_or_else(|| {
                        InferenceError::Computation(format!("placeholder {} was not fed", node.name))
                    })?,
                Op::Dense {
                    input,
                    weights,
                    bias,
                } => Tensor::Float(float(&values, *input)?.dot(weights) + bias),
                Op::Relu(input) => Tensor::Float(float(&values, *input)?.mapv(|v| v.max(0.0))),
                Op::Sigmoid(input) => {
                    Tensor::Float(float(&values, *input)?.mapv(|v| 1.0 / (1.0 + (-v).exp())))
                }
                Op::Tanh(input) => Tensor::Float(float(&values, *input)?.mapv(f64::tanh)),
                Op::Softmax(input) => Tensor::Float(softmax(float(&values, *input)?)),
                Op::Identity(input) => values[*input].clone().ok_or_else(|| {
                    InferenceError::Computation(format!("input of {} was not evaluated", node.name))
                })?,
            };
            values[idx] = Some(value);
        }

        fetches
            .iter()
            .map(|&fetch| {
                values[fetch].clone().ok_or_else(|| {
                    InferenceError::Computation(format!(
                        "fetch {} was not evaluated",
                        self.nodes[fetch].name
                    ))
                })
            })
            .collect()
    }

    fn resolve_input(&self, node: &str, input: &str) -> Result<usize, LoadError> {
        node_name(input)
            .and_then(|name| self.index.get(name).copied())
            .ok_or_else(|| {
                LoadError::InvalidGraph(format!("node {node} references undeclared node {input}"))
            })
    }

    fn float_input(&self, node: &str, input: &str) -> Result<(usize, usize), LoadError> {
        let idx = self.resolve_input(node, input)?;
        match self.nodes[idx].kind {
            Kind::Float(width) => Ok((idx, width)),
            Kind::Int => Err(LoadError::InvalidGraph(format!(
                "node {node} needs a float input but {input} is int"
            ))),
        }
    }

    fn activation(
        &self,
        node: &str,
        input: &str,
        op: fn(usize) -> Op,
    ) -> Result<(Op, Kind), LoadError> {
        let (idx, width) = self.float_input(node, input)?;
        Ok((op(idx), Kind::Float(width)))
    }
}

/// Node name behind a tensor name. Every node has exactly one output, so
/// `name` and `name:0` are the same tensor and other indices do not exist.
fn node_name(tensor: &str) -> Option<&str> {
    match tensor.rsplit_once(':') {
        Some((name, "0")) => Some(name),
        Some(_) => None,
        None => Some(tensor),
    }
}

fn float(values: &[Option<Tensor>], idx: usize) -> Result<&Array2<f64>, InferenceError> {
    match values[idx].as_ref() {
        Some(Tensor::Float(array)) => Ok(array),
        Some(Tensor::Int(_)) => Err(InferenceError::Computation(
            "expected a float tensor, found int".to_string(),
        )),
        None => Err(InferenceError::Computation(
            "input tensor was not evaluated".to_string(),
        )),
    }
}

/// Row-wise softmax, shifted by the row max for stability.
fn softmax(input: &Array2<f64>) -> Array2<f64> {
    let mut out = input.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

fn param<'a>(params: &'a Params, name: &str) -> Result<&'a ParamDef, LoadError> {
    params
        .get(name)
        .ok_or_else(|| LoadError::MissingParameter(name.to_string()))
}

fn matrix(params: &Params, name: &str, rows: usize) -> Result<Array2<f64>, LoadError> {
    let def = param(params, name)?;
    let cols = match def.shape.as_slice() {
        [r, c] if *r == rows && *c > 0 => *c,
        _ => {
            return Err(LoadError::ParameterShape {
                name: name.to_string(),
                expected: vec![rows, def.shape.get(1).copied().unwrap_or(0)],
                actual: def.shape.clone(),
            })
        }
    };
    Array2::from_shape_vec((rows, cols), def.data.clone()).map_err(|_| LoadError::ParameterShape {
        name: name.to_string(),
        expected: vec![rows * cols],
        actual: vec![def.data.len()],
    })
}

fn vector(params: &Params, name: &str, len: usize) -> Result<Array1<f64>, LoadError> {
    let def = param(params, name)?;
    if def.shape != [len] || def.data.len() != len {
        return Err(LoadError::ParameterShape {
            name: name.to_string(),
            expected: vec![len],
            actual: def.shape.clone(),
        });
    }
    Ok(Array1::from_vec(def.data.clone()))
}
