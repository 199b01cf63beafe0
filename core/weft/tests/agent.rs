use std::time::Duration;

use pretty_assertions::assert_eq;
use weft::{
    agent,
    controller::{ControllerOptions, NodeState},
    test::{self, id, probe_events},
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn agent_start_load_shutdown() {
    let _ = env_logger::builder().is_test(true).try_init();

    let agent = agent::Builder::new(test::registry())
        .options(ControllerOptions {
            stop_timeout: Duration::from_secs(1),
            ..Default::default()
        })
        .worker_threads(2)
        .handle_ctrl_c(false)
        .build_and_start()
        .expect("the agent should start");

    let summary = agent
        .load_blocking("testing.probe \"agent\" { name = \"agent-lifecycle\" }", TIMEOUT)
        .unwrap();
    assert_eq!(summary.added, vec![id("testing.probe.agent")]);

    let handle = agent.control_handle();
    let info = agent
        .runtime()
        .block_on(handle.component_info(id("testing.probe.agent"), TIMEOUT))
        .unwrap();
    assert_eq!(info.state, NodeState::Running);

    agent.shutdown();
    agent.wait_for_shutdown(TIMEOUT).unwrap();

    let events = probe_events("agent-lifecycle");
    assert_eq!(events.first(), Some(&"built"));
    assert_eq!(events.last(), Some(&"shutdown"));
    assert!(handle.shutdown_token().is_cancelled());
}

#[test]
fn agent_rejects_invalid_configuration() {
    let agent = agent::Builder::new(test::registry())
        .handle_ctrl_c(false)
        .build_and_start()
        .unwrap();

    let err = agent.load_blocking("unknown.kind \"x\" {}", TIMEOUT).unwrap_err();
    let diags = err.diagnostics().expect("the error should contain diagnostics");
    assert_eq!(diags.len(), 1);

    agent.shutdown();
    agent.wait_for_shutdown(Duration::MAX).unwrap();
}
