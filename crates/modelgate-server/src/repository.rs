//! The model repository: one directory per model holding a `config.pbtxt`
//! descriptor and a `1/saved_model.*` artifact. The descriptor is parsed to
//! synthesize the load parameters for the worker kind its platform maps to.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use modelgate_core::{Parameter, ParameterMap, Result, ServerError};

use crate::SharedState;

const CONFIG_FILE: &str = "config.pbtxt";
/// Delay between observing a filesystem event and acting on it, so the
/// writer has finished populating the model directory.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Default)]
pub struct TensorConfig {
    pub name: String,
    pub datatype: String,
    pub shape: Vec<i64>,
}

/// Parsed form of a `config.pbtxt` descriptor.
#[derive(Clone, Debug, Default)]
pub struct ModelConfig {
    pub platform: String,
    pub inputs: Vec<TensorConfig>,
    pub outputs: Vec<TensorConfig>,
    pub parameters: ParameterMap,
}

#[derive(Clone)]
pub struct ModelRepository {
    repository: PathBuf,
}

impl ModelRepository {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.repository
    }

    /// Models currently present: directories containing a descriptor.
    pub fn scan(&self) -> BTreeSet<String> {
        let mut models = BTreeSet::new();
        let Ok(entries) = std::fs::read_dir(&self.repository) else {
            return models;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.join(CONFIG_FILE).exists() || path.join(entry.file_name()).join(CONFIG_FILE).exists()
            {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    models.insert(name.to_string());
                }
            }
        }
        models
    }

    /// Read and translate one model's descriptor into the parameter set its
    /// worker is loaded with.
    pub fn parse_model(&self, model: &str) -> Result<ParameterMap> {
        let mut model_path = self.repository.join(model);
        let mut config_path = model_path.join(CONFIG_FILE);

        // Some exporters create model/model/config.pbtxt; search one
        // directory lower before giving up.
        if !config_path.exists() && model_path.join(model).join(CONFIG_FILE).exists() {
            model_path = model_path.join(model);
            config_path = model_path.join(CONFIG_FILE);
        }

        let text = std::fs::read_to_string(&config_path).map_err(|_| {
            ServerError::NotFound(format!(
                "config file {} could not be opened",
                config_path.display()
            ))
        })?;
        let config = parse_config(&text)?;

        let model_base = model_path.join("1").join("saved_model");
        let mut parameters = ParameterMap::new();

        match config.platform.as_str() {
            "tensorflow_graphdef" => {
                // ZenDNN assumes a square HWC image in and [classes] out.
                for input in &config.inputs {
                    parameters.put("input_node", input.name.as_str());
                    if let Some(size) = input.shape.first() {
                        parameters.put("input_size", *size);
                    }
                    if let Some(channels) = input.shape.last() {
                        parameters.put("image_channels", *channels);
                    }
                }
                for output in &config.outputs {
                    parameters.put("output_node", output.name.as_str());
                    if let Some(classes) = output.shape.first() {
                        parameters.put("output_classes", *classes);
                    }
                }
                parameters.put("worker", "tfzendnn");
                parameters.put("model", format!("{}.pb", model_base.display()));
            }
            "pytorch_torchscript" => {
                parameters.put("worker", "ptzendnn");
                parameters.put("model", format!("{}.pt", model_base.display()));
            }
            "onnx_onnxv1" => {
                parameters.put("worker", "migraphx");
                parameters.put("model", format!("{}.onnx", model_base.display()));
            }
            "migraphx_mxr" => {
                parameters.put("worker", "migraphx");
                parameters.put("model", format!("{}.mxr", model_base.display()));
            }
            "vitis_xmodel" => {
                parameters.put("worker", "xmodel");
                parameters.put("model", format!("{}.xmodel", model_base.display()));
            }
            other => {
                return Err(ServerError::InvalidArgument(format!(
                    "unknown platform: {other}"
                )));
            }
        }

        parameters.merge(&config.parameters);
        Ok(parameters)
    }
}

/// Polling monitor over the repository. Reacts to descriptor add/delete by
/// loading or unloading the model after a short settle delay.
pub struct RepositoryMonitor {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl RepositoryMonitor {
    pub fn start(state: Arc<SharedState>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = channel::bounded(1);
        let handle = std::thread::Builder::new()
            .name("repo-monitor".to_string())
            .spawn(move || {
                let mut seen = state.repository().scan();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let current = state.repository().scan();
                    for model in current.difference(&seen) {
                        debug!(model = %model, "descriptor added");
                        std::thread::sleep(SETTLE_DELAY);
                        if let Err(err) = state.model_load(model, &ParameterMap::new()) {
                            warn!(model = %model, %err, "error loading model");
                        }
                    }
                    for model in seen.difference(&current) {
                        debug!(model = %model, "descriptor removed");
                        std::thread::sleep(SETTLE_DELAY);
                        if let Err(err) = state.model_unload(model) {
                            warn!(model = %model, %err, "error unloading model");
                        }
                    }
                    seen = current;
                }
            })
            .ok();
        Self {
            stop: stop_tx,
            handle,
        }
    }

    pub fn stop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RepositoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse the text-format descriptor. Supports the subset the repository
/// uses: scalar fields, repeated `inputs`/`outputs` blocks, bracketed
/// shape lists, and `parameters` blocks with one-of values.
pub fn parse_config(text: &str) -> Result<ModelConfig> {
    let mut parser = Parser::new(text);
    let mut config = ModelConfig::default();

    while let Some(field) = parser.next_ident()? {
        match field.as_str() {
            "platform" => {
                parser.expect(':')?;
                config.platform = parser.string_value()?;
            }
            "inputs" => config.inputs.extend(parse_tensor_entries(&mut parser)?),
            "outputs" => config.outputs.extend(parse_tensor_entries(&mut parser)?),
            "parameters" => parse_parameter_block(&mut parser, &mut config.parameters)?,
            other => {
                return Err(invalid(format!("unexpected field: {other}")));
            }
        }
    }
    if config.platform.is_empty() {
        return Err(invalid("missing platform".to_string()));
    }
    Ok(config)
}

fn parse_tensor_entries(parser: &mut Parser<'_>) -> Result<Vec<TensorConfig>> {
    // Both `inputs { ... }` and `inputs [ { ... }, ... ]` occur in the wild.
    let mut tensors = Vec::new();
    if parser.consume('[') {
        loop {
            parser.expect('{')?;
            tensors.push(parse_tensor_block(parser)?);
            if !parser.consume(',') {
                break;
            }
        }
        parser.expect(']')?;
    } else {
        parser.expect('{')?;
        tensors.push(parse_tensor_block(parser)?);
    }
    Ok(tensors)
}

fn parse_tensor_block(parser: &mut Parser<'_>) -> Result<TensorConfig> {
    let mut tensor = TensorConfig::default();
    while !parser.consume('}') {
        if parser.consume(',') || parser.consume(';') {
            continue;
        }
        let Some(field) = parser.next_ident()? else {
            return Err(invalid("unterminated tensor block".to_string()));
        };
        parser.expect(':')?;
        match field.as_str() {
            "name" => tensor.name = parser.string_value()?,
            "datatype" => tensor.datatype = parser.string_value()?,
            "shape" => tensor.shape = parser.int_list()?,
            other => {
                return Err(invalid(format!("unexpected tensor field: {other}")));
            }
        }
    }
    Ok(tensor)
}

fn parse_parameter_block(parser: &mut Parser<'_>, out: &mut ParameterMap) -> Result<()> {
    parser.expect('{')?;
    let mut key = None;
    let mut value = None;
    while !parser.consume('}') {
        if parser.consume(',') || parser.consume(';') {
            continue;
        }
        let Some(field) = parser.next_ident()? else {
            return Err(invalid("unterminated parameters block".to_string()));
        };
        parser.expect(':')?;
        match field.as_str() {
            "key" => key = Some(parser.string_value()?),
            "bool_param" => {
                value = Some(Parameter::Bool(parser.ident_value()? == "true"));
            }
            "int64_param" => value = Some(Parameter::Int(parser.int_value()?)),
            "double_param" => value = Some(Parameter::Double(parser.double_value()?)),
            "string_param" => value = Some(Parameter::String(parser.string_value()?)),
            other => {
                return Err(invalid(format!("unexpected parameter field: {other}")));
            }
        }
    }
    match (key, value) {
        (Some(key), Some(value)) => {
            out.put(&key, value);
            Ok(())
        }
        _ => Err(invalid("parameters block needs key and value".to_string())),
    }
}

fn invalid(message: String) -> ServerError {
    ServerError::InvalidArgument(format!("config parse error: {message}"))
}

struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn skip_ws(&mut self) {
        loop {
            self.rest = self.rest.trim_start();
            if self.rest.starts_with('#') {
                match self.rest.find('\n') {
                    Some(nl) => self.rest = &self.rest[nl + 1..],
                    None => self.rest = "",
                }
            } else {
                return;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest.chars().next()
    }

    fn consume(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.rest = &self.rest[expected.len_utf8()..];
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.consume(expected) {
            Ok(())
        } else {
            Err(invalid(format!("expected '{expected}'")))
        }
    }

    fn next_ident(&mut self) -> Result<Option<String>> {
        self.skip_ws();
        if self.rest.is_empty() {
            return Ok(None);
        }
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(invalid(format!(
                "expected identifier near: {:.16}",
                self.rest
            )));
        }
        let ident = self.rest[..end].to_string();
        self.rest = &self.rest[end..];
        Ok(Some(ident))
    }

    fn ident_value(&mut self) -> Result<String> {
        self.next_ident()?
            .ok_or_else(|| invalid("expected value".to_string()))
    }

    fn string_value(&mut self) -> Result<String> {
        self.expect('"')?;
        let Some(end) = self.rest.find('"') else {
            return Err(invalid("unterminated string".to_string()));
        };
        let value = self.rest[..end].to_string();
        self.rest = &self.rest[end + 1..];
        Ok(value)
    }

    fn number_token(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+' || c == '.' || c == 'e'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(invalid(format!("expected number near: {:.16}", self.rest)));
        }
        let token = &self.rest[..end];
        self.rest = &self.rest[end..];
        Ok(token)
    }

    fn int_value(&mut self) -> Result<i64> {
        let token = self.number_token()?;
        token
            .parse()
            .map_err(|_| invalid(format!("invalid integer: {token}")))
    }

    fn double_value(&mut self) -> Result<f64> {
        let token = self.number_token()?;
        token
            .parse()
            .map_err(|_| invalid(format!("invalid number: {token}")))
    }

    fn int_list(&mut self) -> Result<Vec<i64>> {
        let mut values = Vec::new();
        if self.consume('[') {
            if self.consume(']') {
                return Ok(values);
            }
            loop {
                values.push(self.int_value()?);
                if !self.consume(',') {
                    break;
                }
            }
            self.expect(']')?;
        } else {
            values.push(self.int_value()?);
        }
        Ok(values)
    }
}
