use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use modelgate_core::{
    DataType, InferenceRequest, InputTensor, MemoryPool, Metrics, ParameterMap, ServerError,
    Shape,
};
use modelgate_runtime::RequestContainer;
use modelgate_server::{ModelRepository, RepositoryMonitor, SharedState};
use modelgate_workers::{Echo, WorkerCatalog};

fn write_model(root: &std::path::Path, model: &str, config: &str) {
    let dir = root.join(model);
    std::fs::create_dir_all(dir.join("1")).unwrap();
    std::fs::write(dir.join("1").join("saved_model.xmodel"), b"").unwrap();
    std::fs::write(dir.join("config.pbtxt"), config).unwrap();
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn parse_model_maps_platforms_to_workers() {
    let dir = tempfile::tempdir().unwrap();
    write_model(
        dir.path(),
        "resnet50",
        r#"
            platform: "tensorflow_graphdef"
            inputs { name: "input" datatype: "fp32" shape: [224, 224, 3] }
            outputs { name: "predictions" datatype: "fp32" shape: [1000] }
        "#,
    );
    let repository = ModelRepository::new(dir.path());

    let params = repository.parse_model("resnet50").unwrap();
    assert_eq!(params.get_string("worker"), Some("tfzendnn"));
    assert_eq!(params.get_string("input_node"), Some("input"));
    assert_eq!(params.get_int("input_size"), Some(224));
    assert_eq!(params.get_int("image_channels"), Some(3));
    assert_eq!(params.get_string("output_node"), Some("predictions"));
    assert_eq!(params.get_int("output_classes"), Some(1000));
    let model = params.get_string("model").unwrap();
    assert!(model.ends_with("1/saved_model.pb"), "{model}");
}

#[test]
fn parse_model_handles_nested_layout() {
    // Some exporters produce model/model/config.pbtxt.
    let dir = tempfile::tempdir().unwrap();
    write_model(
        &dir.path().join("mnist"),
        "mnist",
        r#"platform: "onnx_onnxv1""#,
    );
    let repository = ModelRepository::new(dir.path());

    let params = repository.parse_model("mnist").unwrap();
    assert_eq!(params.get_string("worker"), Some("migraphx"));
    assert!(params.get_string("model").unwrap().ends_with(".onnx"));
}

#[test]
fn missing_and_broken_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let repository = ModelRepository::new(dir.path());
    assert!(matches!(
        repository.parse_model("ghost"),
        Err(ServerError::NotFound(_))
    ));

    write_model(dir.path(), "weird", r#"platform: "caffe2_netdef""#);
    assert!(matches!(
        repository.parse_model("weird"),
        Err(ServerError::InvalidArgument(_))
    ));
}

#[test]
fn descriptor_parameters_reach_the_load() {
    let dir = tempfile::tempdir().unwrap();
    write_model(
        dir.path(),
        "tuned",
        r#"
            platform: "vitis_xmodel"
            parameters { key: "batch_size" int64_param: 2 }
        "#,
    );
    let repository = ModelRepository::new(dir.path());
    let params = repository.parse_model("tuned").unwrap();
    assert_eq!(params.get_int("batch_size"), Some(2));
    assert_eq!(params.get_string("worker"), Some("xmodel"));
}

fn xmodel_state(root: &std::path::Path) -> Arc<SharedState> {
    // Stand in for the FPGA back-end with the echo worker so the
    // repository flow can run end to end.
    let mut catalog = WorkerCatalog::new();
    catalog.register("xmodel", || Box::new(Echo::new()));
    Arc::new(SharedState::new(
        catalog,
        ModelRepository::new(root),
        Arc::new(MemoryPool::new()),
        Arc::new(Metrics::new().unwrap()),
    ))
}

#[test]
fn load_existing_models_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "addone", r#"platform: "vitis_xmodel""#);
    let state = xmodel_state(dir.path());

    let loaded = state.load_repository();
    assert_eq!(loaded, vec!["addone".to_string()]);
    assert!(state.model_ready("addone").unwrap());

    let (request, resp_rx) = InferenceRequest::new(vec![InputTensor::new(
        "in",
        Shape::from_slice(&[1]),
        DataType::Uint32,
        Bytes::copy_from_slice(&5u32.to_le_bytes()),
    )]);
    state
        .model_infer("addone", RequestContainer::new(request))
        .unwrap();
    let response = resp_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(
        u32::from_le_bytes(response.outputs[0].data[..4].try_into().unwrap()),
        6
    );

    state.model_unload("addone").unwrap();
}

#[test]
fn monitor_reacts_to_descriptor_changes() {
    let dir = tempfile::tempdir().unwrap();
    let state = xmodel_state(dir.path());
    let mut monitor = RepositoryMonitor::start(Arc::clone(&state), Duration::from_millis(50));

    write_model(dir.path(), "addone", r#"platform: "vitis_xmodel""#);
    assert!(wait_until(|| state.model_list().contains(&"addone".to_string())));
    assert!(state.model_ready("addone").unwrap());

    std::fs::remove_dir_all(dir.path().join("addone")).unwrap();
    assert!(wait_until(|| state.model_list().is_empty()));

    monitor.stop();
}

#[test]
fn model_load_for_missing_worker_kind_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "torchy", r#"platform: "pytorch_torchscript""#);
    let state = Arc::new(SharedState::new(
        WorkerCatalog::with_defaults(),
        ModelRepository::new(dir.path()),
        Arc::new(MemoryPool::new()),
        Arc::new(Metrics::new().unwrap()),
    ));

    // The descriptor resolves to ptzendnn, which this build does not link.
    assert!(matches!(
        state.model_load("torchy", &ParameterMap::new()),
        Err(ServerError::NotFound(_))
    ));
}
