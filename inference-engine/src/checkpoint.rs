//! On-disk checkpoint format
//!
//! A checkpoint is a directory holding two JSON files:
//!
//! - `export.meta`: the graph plus two metadata collections. Each collection
//!   is a JSON *string* encoding an object that maps logical roles to tensor
//!   names, e.g. `"{\"image\": \"x:0\", \"key\": \"input_key:0\"}"`.
//! - `export.params`: trained parameters keyed by name, each a row-major
//!   `{ "shape": [...], "data": [...] }` block.

use std::collections::HashMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Graph and metadata file name
pub const META_FILE: &str = "export.meta";

/// Parameter file name
pub const PARAMS_FILE: &str = "export.params";

/// Collection mapping input roles to tensor names
pub const INPUTS_COLLECTION: &str = "inputs";

/// Collection mapping output roles to tensor names
pub const OUTPUTS_COLLECTION: &str = "outputs";

/// Contents of `export.meta`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetaGraph {
    #[serde(default)]
    pub collections: HashMap<String, String>,
    pub graph: GraphDef,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeDef {
    pub name: String,
    #[serde(flatten)]
    pub op: OpDef,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Float,
    Int,
}

/// Node operations understood by the evaluator
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpDef {
    Placeholder {
        dtype: DType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<usize>,
    },
    Dense {
        input: String,
        weights: String,
        bias: String,
    },
    Relu {
        input: String,
    },
    Sigmoid {
        input: String,
    },
    Tanh {
        input: String,
    },
    Softmax {
        input: String,
    },
    Identity {
        input: String,
    },
}

/// A named parameter block from `export.params`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

pub type Params = HashMap<String, ParamDef>;

/// Role to tensor-name bindings decoded from a metadata collection
pub type Bindings = HashMap<String, String>;

impl MetaGraph {
    /// Decode one of the role-binding collections.
    pub fn bindings(&self, name: &'static str) -> Result<Bindings, LoadError> {
        let raw = self
            .collections
            .get(name)
            .ok_or(LoadError::MissingCollection(name))?;
        serde_json::from_str(raw).map_err(|source| LoadError::BadCollection { name, source })
    }
}

/// Read `export.meta` and `export.params` from a checkpoint directory.
pub fn read_checkpoint(checkpoint: &Path) -> Result<(MetaGraph, Params), LoadError> {
    if !checkpoint.is_dir() {
        return Err(LoadError::MissingCheckpoint(checkpoint.to_path_buf()));
    }

    let meta: MetaGraph = read_json(&checkpoint.join(META_FILE))?;
    let params: Params = read_json(&checkpoint.join(PARAMS_FILE))?;

    Ok((meta, params))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| LoadError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}
