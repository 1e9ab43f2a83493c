//! Argument parsing tests for the CLI.

use super::*;
use crate::provisioner::Phase;

#[test]
fn test_cli_parsing() {
    assert!(Cli::try_parse_from(["provisor", "--help"]).is_err());
    assert!(Cli::try_parse_from(["provisor", "validate", "web"]).is_ok());
    assert!(Cli::try_parse_from(["provisor", "validate"]).is_err());
}

#[test]
fn test_log_filter_flags() {
    let cli = Cli::try_parse_from(["provisor", "--verbose", "validate", "web"]).unwrap();
    assert_eq!(cli.log_filter(), Some("debug"));

    let cli = Cli::try_parse_from(["provisor", "validate", "web", "-q"]).unwrap();
    assert_eq!(cli.log_filter(), Some("error"));

    assert!(Cli::try_parse_from(["provisor", "-v", "-q", "validate", "web"]).is_err());
}

#[test]
fn test_provision_phase() {
    let cli = Cli::try_parse_from(["provisor", "provision", "web"]).unwrap();
    let Commands::Provision(cmd) = cli.command else {
        panic!("expected provision");
    };
    assert_eq!(cmd.phase, Phase::Create);

    let cli = Cli::try_parse_from(["provisor", "provision", "web", "--phase", "update"]).unwrap();
    let Commands::Provision(cmd) = cli.command else {
        panic!("expected provision");
    };
    assert_eq!(cmd.phase, Phase::Update);

    assert!(Cli::try_parse_from(["provisor", "provision", "web", "--phase", "rebuild"]).is_err());
}

#[test]
fn test_render_and_deploy_arguments() {
    let cli = Cli::try_parse_from([
        "provisor",
        "--config",
        "/p/provisor.toml",
        "render",
        "t.tera",
        "--namespace",
        "lxc#web",
        "-o",
        "out.txt",
    ])
    .unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("/p/provisor.toml")));
    let Commands::Render(cmd) = cli.command else {
        panic!("expected render");
    };
    assert_eq!(cmd.namespace, "lxc#web");
    assert_eq!(cmd.output, Some(PathBuf::from("out.txt")));

    assert!(Cli::try_parse_from(["provisor", "deploy", "web"]).is_err());
    assert!(Cli::try_parse_from(["provisor", "deploy", "web", "--stack", "monitoring", "--dry-run"]).is_ok());
}
