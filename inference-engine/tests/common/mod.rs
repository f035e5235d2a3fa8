//! Checkpoint fixtures shared by the integration tests

use std::path::Path;

use serde_json::{json, Value};

/// Write `export.meta` and `export.params` into `dir`.
pub fn write_checkpoint(dir: &Path, meta: &Value, params: &Value) {
    std::fs::write(dir.join("export.meta"), meta.to_string()).unwrap();
    std::fs::write(dir.join("export.params"), params.to_string()).unwrap();
}

/// Identity-weighted softmax classifier over `width` features.
///
/// Tensor names deliberately differ from the role names so loading has to
/// go through the metadata collections.
pub fn identity_classifier(dir: &Path, width: usize) {
    let mut weights = vec![0.0; width * width];
    for i in 0..width {
        weights[i * width + i] = 1.0;
    }

    let meta = json!({
        "collections": {
            "inputs": json!({"image": "Placeholder:0", "key": "input_key:0"}).to_string(),
            "outputs": json!({"scores": "probabilities", "key": "output_key"}).to_string(),
        },
        "graph": {
            "nodes": [
                {"name": "Placeholder", "op": "placeholder", "dtype": "float", "width": width},
                {"name": "input_key", "op": "placeholder", "dtype": "int"},
                {"name": "labels", "op": "placeholder", "dtype": "int"},
                {"name": "logits", "op": "dense", "input": "Placeholder", "weights": "w", "bias": "b"},
                {"name": "probabilities", "op": "softmax", "input": "logits"},
                {"name": "output_key", "op": "identity", "input": "input_key"}
            ]
        }
    });
    let params = json!({
        "w": {"shape": [width, width], "data": weights},
        "b": {"shape": [width], "data": vec![0.0; width]},
    });

    write_checkpoint(dir, &meta, &params);
}
