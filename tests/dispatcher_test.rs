//! End-to-end dispatcher behavior through the runtime facade.

mod common;

use std::time::Duration;

use common::{classifier, drain_n, runtime, small_inputs, small_network, zeroed_image};
use snpe_rt::platform::DeviceProfile;
use snpe_rt::{
    Accelerator, CancelOutcome, CompletionStatus, DispatcherState, ErrorKind, SessionConfig, TensorBuffer, TensorMap,
};

#[test]
fn test_classifier_happy_path() {
    let (rt, _) = runtime(DeviceProfile::cpu_only(), 8);
    let session = rt
        .open_session_with(classifier(), SessionConfig::default().with_accelerators([Accelerator::Cpu]))
        .unwrap();

    let id = rt.submit(session.id(), zeroed_image(vec![1, 3, 224, 224]), TensorMap::new(), None).unwrap();
    assert_eq!(id, 0);

    let records = drain_n(&rt, 1);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.sequence_id, 0);
    assert_eq!(record.status, CompletionStatus::Ok);
    assert_eq!(record.outputs["scores"].to_f32().len(), 1000);
    assert_eq!(record.session, session.id());
}

#[test]
fn test_cancel_pending_requests_in_order() {
    let profile = DeviceProfile::cpu_only().with_latency(Duration::from_millis(100));
    let (rt, counters) = runtime(profile, 8);
    let session = rt.open_session(small_network()).unwrap();

    let ids: Vec<u64> =
        (0..8).map(|_| rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap()).collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    for id in 1..8 {
        assert_eq!(rt.cancel(id), CancelOutcome::Removed);
    }

    let records = drain_n(&rt, 8);
    let seen: Vec<u64> = records.iter().map(|r| r.sequence_id).collect();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
    assert_eq!(records[0].status, CompletionStatus::Ok);
    for record in &records[1..] {
        assert_eq!(record.status, CompletionStatus::Cancelled);
        assert!(record.outputs.is_empty() || record.outputs.values().all(|b| b.to_f32().iter().all(|v| *v == 0.0)));
    }
    assert_eq!(counters.executions(), 1);
    // Cancelled requests hand their inputs back.
    assert_eq!(records[5].inputs["x"].to_f32(), vec![1.0; 4]);
}

#[test]
fn test_shape_mismatch_fails_without_executor() {
    let (rt, counters) = runtime(DeviceProfile::cpu_only(), 8);
    let session = rt.open_session(classifier()).unwrap();

    rt.submit(session.id(), zeroed_image(vec![1, 3, 223, 224]), TensorMap::new(), None).unwrap();
    let records = drain_n(&rt, 1);
    assert_eq!(records[0].status, CompletionStatus::Failed(ErrorKind::ShapeMismatch));
    assert_eq!(records[0].error.as_ref().map(|e| e.kind), Some(ErrorKind::ShapeMismatch));
    assert_eq!(counters.executions(), 0);
}

#[test]
fn test_queue_saturation() {
    let profile = DeviceProfile::cpu_only().with_latency(Duration::from_millis(50));
    let (rt, _) = runtime(profile, 2);
    let session = rt.open_session(small_network()).unwrap();

    rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap();
    rt.submit(session.id(), small_inputs(2.0), TensorMap::new(), None).unwrap();
    let err = rt.submit(session.id(), small_inputs(3.0), TensorMap::new(), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);
    assert!(err.kind.is_retryable());

    let records = drain_n(&rt, 2);
    assert_eq!(records.len(), 2);
    std::thread::sleep(Duration::from_millis(50));
    assert!(rt.drain_completions(8).is_empty(), "rejected request was never enqueued");
    assert_eq!(rt.stats().rejected, 1);
}

#[test]
fn test_capacity_boundary() {
    let profile = DeviceProfile::cpu_only().with_latency(Duration::from_millis(50));
    let (rt, _) = runtime(profile, 4);
    let session = rt.open_session(small_network()).unwrap();

    for _ in 0..3 {
        rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap();
    }
    // capacity - 1 outstanding: one more fits.
    rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap();
    let err = rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);
}

#[test]
fn test_shutdown_delivers_in_flight_and_cancels_pending() {
    let profile = DeviceProfile::cpu_only().with_latency(Duration::from_millis(200));
    let (rt, _) = runtime(profile, 8);
    let session = rt.open_session(small_network()).unwrap();

    rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    rt.submit(session.id(), small_inputs(2.0), TensorMap::new(), None).unwrap();
    rt.submit(session.id(), small_inputs(3.0), TensorMap::new(), None).unwrap();

    rt.dispatcher().shutdown();
    assert_eq!(rt.dispatcher().state(), DispatcherState::Stopped);

    let records = rt.drain_completions(8);
    let statuses: Vec<_> = records.iter().map(|r| (r.sequence_id, r.status)).collect();
    assert_eq!(
        statuses,
        vec![(0, CompletionStatus::Ok), (1, CompletionStatus::Cancelled), (2, CompletionStatus::Cancelled)]
    );
}

#[test]
fn test_submit_after_shutdown_is_rejected() {
    let (rt, _) = runtime(DeviceProfile::cpu_only(), 8);
    let session = rt.open_session(small_network()).unwrap();
    rt.dispatcher().shutdown();
    for _ in 0..3 {
        let err = rt.submit(session.id(), small_inputs(1.0), TensorMap::new(), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Shutdown);
    }
}

#[test]
fn test_per_session_order_across_sessions() {
    let profile = DeviceProfile::cpu_only().with_latency(Duration::from_millis(2));
    let (rt, _) = runtime(profile, 8);
    let a = rt.open_session(small_network()).unwrap();
    let b = rt.open_session(small_network()).unwrap();

    let mut submitted = Vec::new();
    let mut records = Vec::new();
    for i in 0..24 {
        let session = if i % 3 == 0 { b.id() } else { a.id() };
        loop {
            match rt.submit(session, small_inputs(i as f32), TensorMap::new(), None) {
                Ok(id) => {
                    submitted.push((id, session));
                    break;
                }
                Err(e) if e.kind == ErrorKind::QueueFull => records.extend(rt.drain_completions(8)),
                Err(e) => panic!("unexpected {}", e),
            }
        }
    }
    records.extend(drain_n(&rt, 24 - records.len()));
    assert_eq!(records.len(), 24);

    for session in [a.id(), b.id()] {
        let order: Vec<u64> = records.iter().filter(|r| r.session == session).map(|r| r.sequence_id).collect();
        let expected: Vec<u64> = submitted.iter().filter(|(_, s)| *s == session).map(|(id, _)| *id).collect();
        assert_eq!(order, expected);
    }
    for record in &records {
        let value = record.inputs["x"].to_f32()[0];
        assert_eq!(record.outputs["y"].to_f32(), vec![value; 4]);
    }
}

#[test]
fn test_extra_output_key_rejected_without_executor() {
    let (rt, counters) = runtime(DeviceProfile::cpu_only(), 8);
    let session = rt.open_session(small_network()).unwrap();

    let mut outputs = TensorMap::new();
    outputs.insert("w".into(), TensorBuffer::from_f32("w", vec![1], &[0.0]).unwrap());
    rt.submit(session.id(), small_inputs(1.0), outputs, None).unwrap();

    let records = drain_n(&rt, 1);
    assert_eq!(records[0].status, CompletionStatus::Failed(ErrorKind::InvalidArgument));
    assert_eq!(records[0].error.as_ref().and_then(|e| e.tensor.as_deref()), Some("w"));
    assert_eq!(counters.executions(), 0);
}

#[test]
fn test_closed_session_completes_cancelled() {
    let profile = DeviceProfile::cpu_only().with_latency(Duration::from_millis(100));
    let (rt, _) = runtime(profile, 8);
    let slow = rt.open_session(small_network()).unwrap();
    let closing = rt.open_session(small_network()).unwrap();

    rt.submit(slow.id(), small_inputs(1.0), TensorMap::new(), None).unwrap();
    rt.submit(closing.id(), small_inputs(2.0), TensorMap::new(), None).unwrap();
    rt.close_session(closing.id());

    let records = drain_n(&rt, 2);
    assert_eq!(records[0].status, CompletionStatus::Ok);
    assert_eq!(records[1].status, CompletionStatus::Cancelled);
}

#[tokio::test]
async fn test_async_next_completion() {
    let (rt, _) = runtime(DeviceProfile::cpu_only(), 8);
    let session = rt.open_session(small_network()).unwrap();
    rt.submit(session.id(), small_inputs(4.0), TensorMap::new(), None).unwrap();

    let record = rt.next_completion(Duration::from_secs(5)).await.expect("completion");
    assert!(record.is_ok());
    assert_eq!(record.outputs["z"].to_f32(), vec![4.0, 4.0]);
    assert!(rt.next_completion(Duration::from_millis(20)).await.is_none());
    assert_eq!(rt.dispatcher().outstanding(), 0);
}
