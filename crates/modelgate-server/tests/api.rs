use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel;

use modelgate_core::{
    DataType, InferenceRequest, InputTensor, MemoryPool, Metrics, OutputRequest, ParameterMap,
    ServerError, Shape,
};
use modelgate_runtime::RequestContainer;
use modelgate_server::{ModelRepository, SharedState};
use modelgate_workers::WorkerCatalog;

fn state() -> SharedState {
    SharedState::new(
        WorkerCatalog::with_defaults(),
        ModelRepository::new("models"),
        Arc::new(MemoryPool::new()),
        Arc::new(Metrics::new().unwrap()),
    )
}

fn uint32_input(name: &str, values: &[u32]) -> InputTensor {
    let mut data = Vec::with_capacity(values.len() * 4);
    for value in values {
        data.extend_from_slice(&value.to_le_bytes());
    }
    InputTensor::new(
        name,
        Shape::from_slice(&[values.len()]),
        DataType::Uint32,
        Bytes::from(data),
    )
}

fn uint32_values(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[test]
fn echo_round_trip() {
    let state = state();
    let endpoint = state.worker_load("echo", &ParameterMap::new()).unwrap();
    assert_eq!(endpoint, "echo");
    assert!(state.model_ready(&endpoint).unwrap());

    let (request, resp_rx) = InferenceRequest::new(vec![uint32_input("in", &[41])]);
    state
        .model_infer(&endpoint, RequestContainer::new(request))
        .unwrap();

    let response = resp_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(!response.is_error());
    assert_eq!(response.model, "echo");
    assert_eq!(response.outputs.len(), 1);
    assert_eq!(response.outputs[0].name, "in");
    assert_eq!(response.outputs[0].dtype, DataType::Uint32);
    assert_eq!(uint32_values(&response.outputs[0].data), vec![42]);

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn requested_output_names_the_response_tensor() {
    let state = state();
    let endpoint = state.worker_load("echo", &ParameterMap::new()).unwrap();

    let (mut request, resp_rx) = InferenceRequest::new(vec![uint32_input("in", &[1])]);
    request.add_output(OutputRequest::new("renamed"));
    state
        .model_infer(&endpoint, RequestContainer::new(request))
        .unwrap();

    let response = resp_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(response.outputs[0].name, "renamed");

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn loading_twice_shares_one_worker() {
    let state = state();
    let first = state.worker_load("echo", &ParameterMap::new()).unwrap();
    let second = state.worker_load("echo", &ParameterMap::new()).unwrap();
    assert_eq!(first, second);
    assert_eq!(state.model_list(), vec![first.clone()]);

    // Two references, so the first unload keeps the endpoint alive.
    state.worker_unload(&first).unwrap();
    assert!(state.model_ready(&first).unwrap());
    state.worker_unload(&first).unwrap();
    assert!(state.model_list().is_empty());
}

#[test]
fn refcount_survives_fewer_unloads_than_loads() {
    let state = state();
    let mut params = ParameterMap::new();
    params.put("batch_timeout_ms", 5);

    let name = state.worker_load("echo", &params).unwrap();
    for _ in 0..2 {
        assert_eq!(state.worker_load("echo", &params).unwrap(), name);
    }
    for _ in 0..2 {
        state.worker_unload(&name).unwrap();
    }
    assert!(state.model_ready(&name).unwrap());

    state.worker_unload(&name).unwrap();
    assert!(matches!(
        state.model_ready(&name),
        Err(ServerError::NotFound(_))
    ));
}

#[test]
fn sharing_disabled_gets_suffixed_names() {
    let state = state();
    let mut params = ParameterMap::new();
    params.put("share", false);

    let first = state.worker_load("echo", &params).unwrap();
    let second = state.worker_load("echo", &params).unwrap();
    assert_eq!(first, "echo");
    assert_eq!(second, "echo-1");
    assert_eq!(state.model_list(), vec!["echo".to_string(), "echo-1".to_string()]);

    state.worker_unload(&first).unwrap();
    state.worker_unload(&second).unwrap();
}

#[test]
fn explicit_endpoint_collision_is_already_exists() {
    let state = state();
    let mut params = ParameterMap::new();
    params.put("share", false);
    params.put("endpoint", "adder");

    assert_eq!(state.worker_load("echo", &params).unwrap(), "adder");
    assert!(matches!(
        state.worker_load("echo", &params),
        Err(ServerError::AlreadyExists(_))
    ));

    state.worker_unload("adder").unwrap();
}

#[test]
fn echo_multi_fans_out_cyclically() {
    let state = state();
    let endpoint = state.worker_load("echo_multi", &ParameterMap::new()).unwrap();

    let inputs = vec![
        uint32_input("input0", &[10]),
        uint32_input("input1", &[20, 30]),
    ];
    let (request, resp_rx) = InferenceRequest::new(inputs);
    state
        .model_infer(&endpoint, RequestContainer::new(request))
        .unwrap();

    let response = resp_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(!response.is_error());
    assert_eq!(response.outputs.len(), 3);
    assert_eq!(response.outputs[0].shape, Shape::from_slice(&[1]));
    assert_eq!(response.outputs[1].shape, Shape::from_slice(&[4]));
    assert_eq!(response.outputs[2].shape, Shape::from_slice(&[3]));
    assert_eq!(uint32_values(&response.outputs[0].data), vec![10]);
    assert_eq!(uint32_values(&response.outputs[1].data), vec![20, 30, 10, 20]);
    assert_eq!(uint32_values(&response.outputs[2].data), vec![30, 10, 20]);

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn list_empties_after_unload() {
    let state = state();
    let endpoint = state.worker_load("echo", &ParameterMap::new()).unwrap();
    assert_eq!(state.model_list(), vec![endpoint.clone()]);

    state.worker_unload(&endpoint).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !state.model_list().is_empty() {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn every_listed_model_is_ready_with_metadata() {
    let state = state();
    state.worker_load("echo", &ParameterMap::new()).unwrap();
    state.worker_load("echo_multi", &ParameterMap::new()).unwrap();

    for name in state.model_list() {
        assert!(state.model_ready(&name).unwrap());
        let metadata = state.model_metadata(&name).unwrap();
        assert!(!metadata.inputs.is_empty());
        assert!(!metadata.outputs.is_empty());
        state.worker_unload(&name).unwrap();
    }
}

#[test]
fn unknown_model_is_not_found() {
    let state = state();

    let (request, _resp_rx) = InferenceRequest::new(vec![uint32_input("in", &[1])]);
    assert!(matches!(
        state.model_infer("nonexistent", RequestContainer::new(request)),
        Err(ServerError::NotFound(_))
    ));
    assert!(matches!(
        state.model_metadata("nonexistent"),
        Err(ServerError::NotFound(_))
    ));
    assert!(matches!(
        state.worker_unload("nonexistent"),
        Err(ServerError::NotFound(_))
    ));
}

#[test]
fn bad_shape_fails_via_the_callback() {
    let state = state();
    let endpoint = state.worker_load("echo", &ParameterMap::new()).unwrap();

    let (request, resp_rx) = InferenceRequest::new(vec![uint32_input("in", &[1, 2])]);
    state
        .model_infer(&endpoint, RequestContainer::new(request))
        .unwrap();

    let response = resp_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(response.is_error());
    assert!(matches!(
        response.error(),
        Some(ServerError::InvalidArgument(_))
    ));

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn empty_inputs_fail_synchronously() {
    let state = state();
    let endpoint = state.worker_load("echo", &ParameterMap::new()).unwrap();

    let (request, _resp_rx) = InferenceRequest::new(Vec::new());
    assert!(matches!(
        state.model_infer(&endpoint, RequestContainer::new(request)),
        Err(ServerError::InvalidArgument(_))
    ));

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn fifo_per_model_for_same_thread_submissions() {
    let state = state();
    let mut params = ParameterMap::new();
    params.put("batch_size", 4);
    params.put("batch_timeout_ms", 5);
    let endpoint = state.worker_load("echo", &params).unwrap();

    // All requests report onto one stream so completion order is visible.
    let (tx, rx) = channel::unbounded();
    let total = 20u32;
    for i in 0..total {
        let mut request =
            InferenceRequest::with_callback(vec![uint32_input("in", &[i])], tx.clone());
        request.set_id(&i.to_string());
        state
            .model_infer(&endpoint, RequestContainer::new(request))
            .unwrap();
    }
    drop(tx);

    for expected in 0..total {
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.id, expected.to_string());
    }

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn batched_requests_all_complete() {
    let state = state();
    let mut params = ParameterMap::new();
    params.put("batch_size", 8);
    params.put("batch_timeout_ms", 10);
    let endpoint = state.worker_load("echo", &params).unwrap();

    let (tx, rx) = channel::unbounded();
    for i in 0..8u32 {
        let request = InferenceRequest::with_callback(vec![uint32_input("in", &[i])], tx.clone());
        state
            .model_infer(&endpoint, RequestContainer::new(request))
            .unwrap();
    }
    drop(tx);

    let mut values: Vec<u32> = (0..8)
        .map(|_| {
            let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert!(!response.is_error());
            uint32_values(&response.outputs[0].data)[0]
        })
        .collect();
    values.sort_unstable();
    assert_eq!(values, (1..=8).collect::<Vec<u32>>());

    state.worker_unload(&endpoint).unwrap();
}

#[test]
fn unload_never_drops_a_callback() {
    let state = state();
    let mut params = ParameterMap::new();
    params.put("batch_size", 2);
    params.put("batch_timeout_ms", 50);
    let endpoint = state.worker_load("echo", &params).unwrap();

    let (tx, rx) = channel::unbounded();
    let total = 16u32;
    for i in 0..total {
        let request = InferenceRequest::with_callback(vec![uint32_input("in", &[i])], tx.clone());
        state
            .model_infer(&endpoint, RequestContainer::new(request))
            .unwrap();
    }
    drop(tx);

    // Unload while requests are still queued; every one of them must still
    // resolve, either with a result or a shutdown error.
    state.worker_unload(&endpoint).unwrap();

    let mut resolved = 0;
    while let Ok(response) = rx.recv_timeout(Duration::from_secs(2)) {
        if response.is_error() {
            assert!(matches!(
                response.error(),
                Some(ServerError::Unavailable(_))
            ));
        }
        resolved += 1;
    }
    assert_eq!(resolved, total);
}

#[test]
fn unknown_worker_kind_is_not_found() {
    let state = state();
    assert!(matches!(
        state.worker_load("tfzendnn", &ParameterMap::new()),
        Err(ServerError::NotFound(_))
    ));
}

#[test]
fn server_surface_basics() {
    let state = state();
    assert!(state.server_live());
    assert!(state.server_ready());
    assert_eq!(state.server_metadata().name, "modelgate");
    assert!(state.has_hardware("cpu", 1));
    assert!(!state.has_hardware("dpu", 1));
}
