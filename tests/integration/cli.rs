use predicates::prelude::*;

use crate::common::TestProject;

const STORE: &str = r#"
["lxc"]
DOMAIN = "home.arpa"

["lxc#web"]
GREETING = "hello from {{ parent.DOMAIN }}"
SECRET_TOKEN = "tok-8c1f"

["lxc#web#monitoring"]
GRAFANA_PORT = 3000
"#;

async fn project() -> TestProject {
    let project = TestProject::with_config("node = \"pve1\"\ndomain = \"lan\"\n").await.unwrap();
    project.write_store(STORE).await.unwrap();
    project.write("templates/motd.tera", "{{ GREETING }}\n").await.unwrap();
    project.write("templates/token.tera", "token={{ SECRET_TOKEN }}\n").await.unwrap();
    project
}

#[tokio::test]
async fn test_render_plain_template_to_stdout() {
    let project = project().await;
    project
        .provisor()
        .args(["render", "templates/motd.tera", "--namespace", "lxc#web"])
        .assert()
        .success()
        .stdout("hello from home.arpa\n");
}

#[tokio::test]
async fn test_render_refuses_secret_output_on_stdout() {
    let project = project().await;
    project
        .provisor()
        .args(["render", "templates/token.tera", "--namespace", "lxc#web"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("tok-8c1f").not())
        .stderr(predicate::str::contains("contains secret values"))
        .stderr(predicate::str::contains("tok-8c1f").not());
}

#[tokio::test]
async fn test_render_secret_to_file() {
    let project = project().await;
    project
        .provisor()
        .args(["render", "templates/token.tera", "--namespace", "lxc#web", "--output", "out/token.env"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tok-8c1f").not());

    let written = std::fs::read_to_string(project.path().join("out/token.env")).unwrap();
    assert_eq!(written, "token=tok-8c1f\n");
}

#[tokio::test]
async fn test_vars_lists_tokens_without_values() {
    let project = project().await;
    project.write("templates/mixed.tera", "{{ GREETING }} {{ SECRET_TOKEN }} {{ MISSING }}").await.unwrap();
    project
        .provisor()
        .args(["vars", "templates/mixed.tera", "--namespace", "lxc#web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GREETING"))
        .stdout(predicate::str::contains("SECRET_TOKEN"))
        .stdout(predicate::str::contains("1 variable(s) missing"))
        .stdout(predicate::str::contains("tok-8c1f").not());
}

#[tokio::test]
async fn test_validate_reports_missing_script() {
    let project = project().await;
    project.write("scripts/setup.sh", "#!/bin/bash\ntrue\n").await.unwrap();
    project
        .write_host(
            "web",
            r#"
hostname = "web"

[[provisioners]]
type = "script"
script = "scripts/setup.sh"

[[provisioners]]
type = "playbook"
playbook = "playbooks/missing.yml"
"#,
        )
        .await
        .unwrap();

    project
        .provisor()
        .args(["validate", "web"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("web-provisioner-0-setup"))
        .stderr(predicate::str::contains("playbooks/missing.yml"));
}

#[tokio::test]
async fn test_validate_unknown_host() {
    let project = project().await;
    std::fs::create_dir_all(project.path().join("hosts")).unwrap();
    project
        .provisor()
        .args(["validate", "db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No host document found for 'db'"));
}

#[tokio::test]
async fn test_deploy_dry_run_lists_targets() {
    let project = project().await;
    project.write_host("web", "hostname = \"web\"\n").await.unwrap();
    project
        .write(
            "stacks/monitoring/grafana.tera.ini",
            "http_port = {{ GRAFANA_PORT }}\ndomain = {{ domain_for_app(app=\"grafana\") }}\n",
        )
        .await
        .unwrap();
    project.write("stacks/monitoring/README.md", "not a template").await.unwrap();

    project
        .provisor()
        .args(["deploy", "web", "--stack", "monitoring", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/provisor/stacks/monitoring/grafana.ini"))
        .stdout(predicate::str::contains("README").not());
}

#[test]
fn test_missing_project_file() {
    let dir = tempfile::tempdir().unwrap();
    assert_cmd::Command::cargo_bin("provisor")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("PROVISOR_CONFIG")
        .args(["validate", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("provisor.toml not found"));
}
