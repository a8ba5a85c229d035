use std::collections::BTreeSet;

use crate::{DataType, Shape};

/// Descriptor for one IO slot of a worker, declared during acquire.
#[derive(Clone, Debug)]
pub struct TensorMetadata {
    pub name: String,
    pub shape: Shape,
    pub dtype: DataType,
}

/// What a worker advertises about itself: its platform and the tensors it
/// consumes and produces.
#[derive(Clone, Debug)]
pub struct ModelMetadata {
    pub name: String,
    pub platform: String,
    pub inputs: Vec<TensorMetadata>,
    pub outputs: Vec<TensorMetadata>,
}

impl ModelMetadata {
    pub fn new(name: &str, platform: &str) -> Self {
        Self {
            name: name.to_string(),
            platform: platform.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn add_input_tensor(&mut self, name: &str, shape: &[usize], dtype: DataType) {
        self.inputs.push(TensorMetadata {
            name: name.to_string(),
            shape: Shape::from_slice(shape),
            dtype,
        });
    }

    pub fn add_output_tensor(&mut self, name: &str, shape: &[usize], dtype: DataType) {
        self.outputs.push(TensorMetadata {
            name: name.to_string(),
            shape: Shape::from_slice(shape),
            dtype,
        });
    }
}

#[derive(Clone, Debug)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub extensions: BTreeSet<String>,
}

impl Default for ServerMetadata {
    fn default() -> Self {
        Self {
            name: "modelgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extensions: BTreeSet::new(),
        }
    }
}
