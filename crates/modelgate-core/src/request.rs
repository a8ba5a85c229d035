use crossbeam::channel;

use crate::{InferenceResponse, InputTensor, OutputRequest, ParameterMap, ServerError};

/// Completion channel for one request. Streaming workers send multiple
/// responses; one-shot adapters collapse the stream to its first element.
pub type ResponseSender = channel::Sender<InferenceResponse>;
pub type ResponseReceiver = channel::Receiver<InferenceResponse>;

/// One inference request on its way through the pipeline. Consumed once:
/// the worker that processes it invokes the callback and the request is
/// dropped with its batch.
#[derive(Debug)]
pub struct InferenceRequest {
    pub id: String,
    pub inputs: Vec<InputTensor>,
    pub outputs: Vec<OutputRequest>,
    pub parameters: ParameterMap,
    callback: Option<ResponseSender>,
}

impl InferenceRequest {
    /// Build a request together with the receiving end of its completion
    /// channel.
    pub fn new(inputs: Vec<InputTensor>) -> (Self, ResponseReceiver) {
        let (tx, rx) = channel::unbounded();
        (Self::with_callback(inputs, tx), rx)
    }

    /// Build a request that reports onto an existing channel. Adapters that
    /// multiplex many requests over one stream use this form.
    pub fn with_callback(inputs: Vec<InputTensor>, callback: ResponseSender) -> Self {
        Self {
            id: String::new(),
            inputs,
            outputs: Vec::new(),
            parameters: ParameterMap::new(),
            callback: Some(callback),
        }
    }

    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn add_output(&mut self, output: OutputRequest) {
        self.outputs.push(output);
    }

    /// Deliver a response without consuming the callback. Streaming workers
    /// may call this any number of times. A gone receiver is not an error;
    /// the client hung up.
    pub fn run_callback(&self, response: InferenceResponse) {
        if let Some(callback) = &self.callback {
            let _ = callback.send(response);
        }
    }

    /// Deliver exactly one response; the channel is dropped afterwards so a
    /// second delivery is impossible for this request.
    pub fn run_callback_once(&mut self, response: InferenceResponse) {
        if let Some(callback) = self.callback.take() {
            let _ = callback.send(response);
        }
    }

    /// Deliver a single error-bearing response.
    pub fn run_callback_error(&mut self, model: &str, error: ServerError) {
        let response = InferenceResponse::from_error(model, &self.id, error);
        self.run_callback_once(response);
    }
}
