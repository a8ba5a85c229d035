use crate::{OutputTensor, ParameterMap, ServerError};

/// What comes back over a request's completion channel: outputs on success,
/// an error otherwise, never both.
#[derive(Clone, Debug)]
pub struct InferenceResponse {
    pub model: String,
    pub id: String,
    pub outputs: Vec<OutputTensor>,
    pub parameters: ParameterMap,
    error: Option<ServerError>,
}

impl InferenceResponse {
    pub fn new(model: &str, id: &str) -> Self {
        Self {
            model: model.to_string(),
            id: id.to_string(),
            outputs: Vec::new(),
            parameters: ParameterMap::new(),
            error: None,
        }
    }

    pub fn from_error(model: &str, id: &str, error: ServerError) -> Self {
        Self {
            model: model.to_string(),
            id: id.to_string(),
            outputs: Vec::new(),
            parameters: ParameterMap::new(),
            error: Some(error),
        }
    }

    pub fn add_output(&mut self, output: OutputTensor) {
        debug_assert!(self.error.is_none());
        self.outputs.push(output);
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }
}
