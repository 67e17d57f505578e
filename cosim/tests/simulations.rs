use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn ramp_gain() {
    let outcome = cosim::simulations::ramp_gain().await.unwrap();
    assert_eq!(outcome.session.steps, 10);
    assert!((outcome.session.final_time - 1.0).abs() < 1e-9);
    assert_eq!(outcome.nodes.len(), 2);
    assert!(outcome.nodes.iter().all(|node| node.steps == 10 && node.stale_inputs == 0));
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn sine_integrator_real_time() {
    let outcome = cosim::simulations::sine_integrator_real_time().await.unwrap();
    assert_eq!(outcome.session.steps, 10);
    let elapsed = outcome.session.run_duration().unwrap();
    assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20000)]
async fn lossless_chain() {
    let outcome = cosim::simulations::lossy_chain(0.0).await.unwrap();
    assert_eq!(outcome.session.steps, 20);
    assert_eq!(outcome.nodes.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(20000)]
#[tracing_test::traced_test]
async fn silent_network_stalls_registration() {
    use cosim::simulations::SimulationError;
    use cosim_core::{orchestrator::Phase, SessionError};

    let error = cosim::simulations::lossy_chain(1.0).await.unwrap_err();
    match error {
        SimulationError::Session(error @ SessionError::Stalled { .. }) => {
            assert_eq!(error.phase(), Some(Phase::Registration));
        }
        other => panic!("expected a stall, got {}", other),
    }
    assert!(logs_contain("stalled during registration"));
}
