use bytes::Bytes;
use smallvec::SmallVec;

use crate::{DataType, ParameterMap, Result, ServerError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(dims: &[usize]) -> Self {
        Self(dims.iter().copied().collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// One input tensor of a request. The payload is reference-counted so the
/// envelope can cross threads without copying; the batcher is responsible
/// for landing the bytes in back-end-compatible pool memory.
#[derive(Clone, Debug)]
pub struct InputTensor {
    pub name: String,
    pub shape: Shape,
    pub dtype: DataType,
    pub data: Bytes,
    pub parameters: ParameterMap,
}

impl InputTensor {
    pub fn new(name: &str, shape: Shape, dtype: DataType, data: Bytes) -> Self {
        Self {
            name: name.to_string(),
            shape,
            dtype,
            data,
            parameters: ParameterMap::new(),
        }
    }

    /// Byte extent implied by shape and dtype. Not meaningful for string
    /// tensors, whose extent is data-dependent.
    pub fn byte_extent(&self) -> usize {
        self.shape.numel() * self.dtype.size()
    }

    pub fn validate(&self) -> Result<()> {
        if self.dtype != DataType::String && self.data.len() != self.byte_extent() {
            return Err(ServerError::InvalidArgument(format!(
                "tensor {}: {} bytes of data for shape {} of {}",
                self.name,
                self.data.len(),
                self.shape,
                self.dtype,
            )));
        }
        Ok(())
    }
}

/// A requested output: a hint naming a response tensor the client wants.
/// Hints have no guaranteed effect beyond naming.
#[derive(Clone, Debug, Default)]
pub struct OutputRequest {
    pub name: String,
    pub parameters: ParameterMap,
}

impl OutputRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: ParameterMap::new(),
        }
    }
}

/// One output tensor of a response. Owns its payload.
#[derive(Clone, Debug)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Shape,
    pub dtype: DataType,
    pub data: Bytes,
    pub parameters: ParameterMap,
}

impl OutputTensor {
    pub fn new(name: &str, shape: Shape, dtype: DataType, data: Bytes) -> Self {
        Self {
            name: name.to_string(),
            shape,
            dtype,
            data,
            parameters: ParameterMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numel_of_empty_shape_is_one() {
        assert_eq!(Shape::from_slice(&[]).numel(), 1);
        assert_eq!(Shape::from_slice(&[2, 3]).numel(), 6);
    }

    #[test]
    fn validate_checks_byte_extent() {
        let good = InputTensor::new(
            "in",
            Shape::from_slice(&[2]),
            DataType::Uint32,
            Bytes::from(vec![0u8; 8]),
        );
        assert!(good.validate().is_ok());

        let bad = InputTensor::new(
            "in",
            Shape::from_slice(&[2]),
            DataType::Uint32,
            Bytes::from(vec![0u8; 5]),
        );
        assert!(matches!(
            bad.validate(),
            Err(ServerError::InvalidArgument(_))
        ));
    }
}
