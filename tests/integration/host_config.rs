use provisor_cli::hosts::{HostDocument, load_all_host_configs, load_host_config};
use provisor_cli::provisioner::{Credential, Phase, Provisioner};
use provisor_cli::store::FileStore;
use provisor_cli::templating::TemplateRenderer;
use std::sync::Arc;

use crate::common::TestProject;

const STORE: &str = r#"
["lxc"]
SSH_USER = "deploy"

["lxc#web"]
WEB_IP = "10.10.0.21"
NGINX_VERSION = "1.27"
"#;

const WEB_HOST: &str = r#"
hostname = "web"
address = "{{ WEB_IP }}"

[ssh]
user = "{{ parent.SSH_USER }}"
port = 2222
private_key_file = "/keys/web"

[[provisioners]]
type = "script"
script = "scripts/nginx.sh"
run_as = "www-data"
environment = { NGINX_VERSION = "{{ NGINX_VERSION }}" }
run_on = ["create", "update"]

[[provisioners]]
type = "playbook"
playbook = "playbooks/hardening.yml"
replayable = false
connection = { user = "ansible" }
"#;

fn renderer() -> TemplateRenderer {
    TemplateRenderer::new(Arc::new(FileStore::from_toml_str(STORE).unwrap()))
}

#[tokio::test]
async fn test_host_document_renders_in_host_namespace() {
    let project = TestProject::new().await.unwrap();
    let path = project.write_host("web", WEB_HOST).await.unwrap();

    let HostDocument::Ready(host) = load_host_config(&renderer(), &path).await.unwrap() else {
        panic!("document without secrets should be ready");
    };

    let connection = host.connection();
    assert_eq!(connection.host, "10.10.0.21");
    assert_eq!(connection.user, "deploy");
    assert_eq!(connection.port, 2222);
    assert!(matches!(connection.credential, Credential::KeyFile(ref p) if p.ends_with("web")));

    assert_eq!(host.provisioners.len(), 2);
    let Provisioner::Script(script) = &host.provisioners[0] else {
        panic!("first step is a script");
    };
    assert_eq!(script.environment["NGINX_VERSION"], "1.27");
    assert_eq!(script.run_as, "www-data");
    assert!(host.provisioners[0].runs_on(Phase::Update));
    assert!(!host.provisioners[1].runs_on(Phase::Update));

    let step_connection = connection.with_override(host.provisioners[1].connection());
    assert_eq!(step_connection.user, "ansible");
    assert_eq!(step_connection.port, 2222);
}

#[tokio::test]
async fn test_load_all_host_configs_in_file_name_order() {
    let project = TestProject::new().await.unwrap();
    project.write_host("web", WEB_HOST).await.unwrap();
    project.write_host("cache", "hostname = \"cache\"\n").await.unwrap();
    project
        .write_host("broken", "hostname = \"broken\"\naddress = \"{{ NOT_IN_STORE }}\"\n")
        .await
        .unwrap();

    let documents = load_all_host_configs(&renderer(), &project.path().join("hosts")).await.unwrap();
    let names: Vec<String> = documents
        .iter()
        .map(|(path, _)| path.file_stem().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["cache", "web"]);
}
