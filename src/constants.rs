//! Global constants used throughout the provisor codebase.
//!
//! Naming conventions for variable references, remote layout defaults and
//! timeouts live here so that templates, the resolver and the provisioner
//! engine agree on them.

use std::time::Duration;

/// Prefix (case-insensitive) that marks a variable as secret.
///
/// Matching is a prefix match on the bare variable name: `SECRET_TOKEN` and
/// `secret_token` are secret, `MY_SECRETARY` is not.
pub const SECRET_VARIABLE_PREFIX: &str = "SECRET_";

/// Leading path segment addressing the parent namespace (`parent.NAME`).
pub const PARENT_NAMESPACE_MARKER: &str = "parent";

/// Leading path segment addressing an explicit namespace (`ns.lxc.web.NAME`).
pub const EXPLICIT_NAMESPACE_MARKER: &str = "ns";

/// Delimiter joining namespace segments (`lxc#web#grafana`).
pub const NAMESPACE_DELIMITER: char = '#';

/// Root under which render data is exposed to templates (`data.hostname`).
pub const TEMPLATE_DATA_ROOT: &str = "data";

/// Label between the host name and the node in generated domains
/// (`grafana.web.provisor.pve1.example.com`).
pub const DOMAIN_SERVICE_LABEL: &str = "provisor";

/// Root namespace segment for container hosts.
pub const HOST_NAMESPACE_ROOT: &str = "lxc";

/// Default remote root for rendered artifacts.
pub const DEFAULT_REMOTE_OUTPUT_ROOT: &str = "/etc/provisor";

/// Folder name (locally and remotely) holding stack directories.
pub const STACKS_FOLDER_NAME: &str = "stacks";

/// Default SSH user for hosts and provisioners.
pub const DEFAULT_SSH_USER: &str = "root";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default private key used for container hosts.
pub const DEFAULT_SSH_PRIVATE_KEY_FILE: &str = "~/.ssh/lxc_ed25519";

/// Default working directory for script provisioners.
pub const DEFAULT_WORKING_DIRECTORY: &str = "/tmp";

/// Default provisioner timeout in seconds.
pub const DEFAULT_PROVISIONER_TIMEOUT_SECS: u64 = 600;

/// Suffix (after the playbook stem) of the companion requirements file.
pub const PLAYBOOK_REQUIREMENTS_SUFFIX: &str = ".requirements.yaml";

/// Directory (below the working directory) holding uploaded scripts.
pub const REMOTE_SCRIPT_DIR_NAME: &str = "provisor";

/// Timeout for a single reachability probe against the target host.
pub const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of reachability probes before giving up.
pub const DEFAULT_SSH_CONNECT_ATTEMPTS: usize = 10;

/// Maximum backoff delay between reachability probes.
pub const MAX_PROBE_BACKOFF: Duration = Duration::from_secs(5);

/// Timeout for copying a rendered artifact to the remote host.
pub const REMOTE_COPY_TIMEOUT: Duration = Duration::from_secs(120);
