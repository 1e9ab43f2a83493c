use provisor_cli::provisioner::{
    Phase, ProvisionError, Provisioner, ProvisionerEngine, StepKind, StepStatus,
};
use provisor_cli::test_utils::{
    RecordingPlaybookRunner, RecordingTransport, init_test_logging, test_connection,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::common::TestProject;

#[derive(Deserialize)]
struct Steps {
    provisioners: Vec<Provisioner>,
}

fn steps(toml_str: &str) -> Vec<Provisioner> {
    toml::from_str::<Steps>(toml_str).unwrap().provisioners
}

async fn project_with_scripts(names: &[&str]) -> TestProject {
    let project = TestProject::new().await.unwrap();
    for name in names {
        project
            .write(&format!("scripts/{name}.sh"), &format!("#!/bin/bash\necho step-{name}\n"))
            .await
            .unwrap();
    }
    project
}

fn engine(
    project: &TestProject,
    transport: Arc<RecordingTransport>,
    playbooks: Arc<RecordingPlaybookRunner>,
) -> ProvisionerEngine {
    ProvisionerEngine::new(project.path(), "web", test_connection("10.0.0.2"), transport, playbooks)
        .with_connect_attempts(1)
}

#[tokio::test]
async fn test_chain_runs_in_declared_order() {
    init_test_logging(None);
    let project = project_with_scripts(&["a", "b", "c"]).await;
    let transport = Arc::new(RecordingTransport::new());

    let steps = steps(
        r#"
        [[provisioners]]
        type = "script"
        script = "scripts/a.sh"
        [[provisioners]]
        type = "script"
        script = "scripts/b.sh"
        environment = { GREETING = "hi \"there\"" }
        [[provisioners]]
        type = "script"
        script = "scripts/c.sh"
        "#,
    );
    let outcomes = engine(&project, transport.clone(), Arc::new(RecordingPlaybookRunner::new()))
        .run(&steps, Phase::Create)
        .await
        .unwrap();

    let ids: Vec<&str> = outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["web-provisioner-0-a", "web-provisioner-1-b", "web-provisioner-2-c"]);
    assert!(outcomes.iter().all(|o| o.status == StepStatus::Completed));
    assert!(outcomes.windows(2).all(|w| w[0].finished_at <= w[1].started_at));

    let scripts = transport.scripts();
    assert_eq!(scripts.len(), 3);
    assert!(scripts[0].body.contains("echo step-a"));
    assert!(scripts[1].body.contains("export GREETING=\"hi \\\"there\\\"\""));
    assert!(scripts[2].body.contains("echo step-c"));
}

#[tokio::test]
async fn test_failing_step_stops_the_chain() {
    let project = project_with_scripts(&["a", "b", "c"]).await;
    let transport = Arc::new(RecordingTransport::new().fail_when_contains("echo step-b", 3));

    let steps = steps(
        r#"
        [[provisioners]]
        type = "script"
        script = "scripts/a.sh"
        [[provisioners]]
        type = "script"
        script = "scripts/b.sh"
        [[provisioners]]
        type = "script"
        script = "scripts/c.sh"
        "#,
    );
    let failure = engine(&project, transport.clone(), Arc::new(RecordingPlaybookRunner::new()))
        .run(&steps, Phase::Create)
        .await
        .unwrap_err();

    assert_eq!(failure.index, 1);
    assert_eq!(failure.id, "web-provisioner-1-b");
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(failure.completed[0].id, "web-provisioner-0-a");

    let ProvisionError::ScriptFailed {
        exit_code,
        remote_path,
        user_switch,
        ..
    } = &failure.source
    else {
        panic!("expected a script failure, got {:?}", failure.source);
    };
    assert_eq!(*exit_code, Some(3));
    assert_eq!(remote_path, "/tmp/provisor/b/b.sh");
    assert_eq!(user_switch.as_deref(), Some("direct"));

    // c never ran
    assert_eq!(transport.scripts().len(), 2);
}

#[tokio::test]
async fn test_path_escape_fails_before_any_connection() {
    let project = project_with_scripts(&["a"]).await;
    let transport = Arc::new(RecordingTransport::new());

    let steps = steps(
        r#"
        [[provisioners]]
        type = "script"
        script = "scripts/a.sh"
        [[provisioners]]
        type = "script"
        script = "../../etc/passwd"
        "#,
    );
    let failure = engine(&project, transport.clone(), Arc::new(RecordingPlaybookRunner::new()))
        .run(&steps, Phase::Create)
        .await
        .unwrap_err();

    assert_eq!(failure.index, 1);
    assert!(failure.completed.is_empty());
    assert!(matches!(
        failure.source,
        ProvisionError::PathOutsideRoot {
            kind: StepKind::Script,
            ..
        }
    ));
    assert_eq!(transport.probe_count(), 0);
    assert!(transport.scripts().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_project_rejected() {
    let project = project_with_scripts(&[]).await;
    let outside = tempfile::tempdir().unwrap();
    let target = outside.path().join("evil.sh");
    std::fs::write(&target, "rm -rf /").unwrap();
    std::fs::create_dir_all(project.path().join("scripts")).unwrap();
    std::os::unix::fs::symlink(&target, project.path().join("scripts/link.sh")).unwrap();

    let steps = steps("[[provisioners]]\ntype = \"script\"\nscript = \"scripts/link.sh\"\n");
    let failure = engine(&project, Arc::new(RecordingTransport::new()), Arc::new(RecordingPlaybookRunner::new()))
        .run(&steps, Phase::Create)
        .await
        .unwrap_err();
    assert!(matches!(failure.source, ProvisionError::PathOutsideRoot { .. }));
}

#[tokio::test]
async fn test_playbook_failure_reports_completed_scripts() {
    let project = project_with_scripts(&["bootstrap"]).await;
    project.write("playbooks/site.yml", "- hosts: all\n").await.unwrap();
    let transport = Arc::new(RecordingTransport::new());
    let playbooks = Arc::new(RecordingPlaybookRunner::new().fail_step("web-provisioner-1-site"));

    let steps = steps(
        r#"
        [[provisioners]]
        type = "script"
        script = "scripts/bootstrap.sh"
        [[provisioners]]
        type = "playbook"
        playbook = "playbooks/site.yml"
        variables = { app_port = 8080 }
        connection = { host = "10.0.0.99", port = 2200 }
        "#,
    );
    let failure = engine(&project, transport, playbooks.clone())
        .run(&steps, Phase::Create)
        .await
        .unwrap_err();

    assert_eq!(failure.index, 1);
    assert_eq!(failure.completed.len(), 1);
    assert!(matches!(failure.source, ProvisionError::PlaybookFailed { .. }));

    let runs = playbooks.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].host, "10.0.0.99");
    let vars: serde_json::Value = serde_json::from_str(&runs[0].extra_vars).unwrap();
    assert_eq!(vars["ansible_port"], 2200);
    assert_eq!(vars["app_port"], 8080);
    assert!(playbooks.requirements().is_empty());
}
