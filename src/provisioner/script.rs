//! Remote bash program for script provisioners.
//!
//! The program is sent to the host on stdin. It exports the step's
//! environment, writes the script below
//! `<working_directory>/provisor/<name>/`, picks a way to run it as the
//! requested user, runs it, and removes the directory on exit whatever the
//! outcome. Progress and the script's own output go to stderr, which reaches
//! the terminal; stdout carries a single marker line naming the user-switch
//! mechanism.

use secrecy::SecretString;

use super::{ProvisionError, ScriptProvisioner};
use crate::constants::REMOTE_SCRIPT_DIR_NAME;
use crate::utils::shell::{export_lines, is_valid_env_name, single_quote};

/// Prefix of the stdout line reporting the user-switch mechanism.
pub const USER_SWITCH_MARKER: &str = "__provisor_user_switch=";

/// A generated remote program.
pub struct RemoteScript {
    pub remote_dir: String,
    pub remote_path: String,
    /// Full program text; includes environment values.
    pub body: SecretString,
}

/// Build the remote program for `provisioner`.
///
/// # Errors
///
/// Fails when an environment key is not a valid shell identifier.
pub fn build_remote_script(
    step: &str,
    name: &str,
    provisioner: &ScriptProvisioner,
    content: &str,
) -> Result<RemoteScript, ProvisionError> {
    if let Some(key) = provisioner.environment.keys().find(|key| !is_valid_env_name(key)) {
        return Err(ProvisionError::InvalidEnvironmentKey {
            step: step.to_string(),
            key: key.clone(),
        });
    }

    let script_name = provisioner
        .script
        .file_name()
        .map_or_else(|| "script".to_string(), |n| n.to_string_lossy().into_owned());
    let remote_dir = format!(
        "{}/{REMOTE_SCRIPT_DIR_NAME}/{}",
        provisioner.working_directory.trim_end_matches('/'),
        path_safe(name)
    );
    let remote_path = format!("{remote_dir}/{}", path_safe(&script_name));
    let delimiter = heredoc_delimiter(content);

    let mut body = String::new();
    body.push_str(&export_lines(&provisioner.environment));
    body.push_str(&format!(
        r#"cd {working_directory} || exit 1
REMOTE_DIR={remote_dir}
REMOTE_SCRIPT={remote_path}
trap 'rm -rf "$REMOTE_DIR"' EXIT
echo "=== Script Provisioner: {step} ===" >&2
echo "Working directory: $(pwd)" >&2
mkdir -p "$REMOTE_DIR"
cat > "$REMOTE_SCRIPT" <<'{delimiter}'
{content}
{delimiter}
chmod +x "$REMOTE_SCRIPT"
CURRENT_USER=$(whoami)
TARGET_USER={run_as}
if [ "$CURRENT_USER" = "$TARGET_USER" ]; then
  USER_SWITCH=direct
  EXEC_CMD="\"$REMOTE_SCRIPT\""
elif command -v runuser >/dev/null 2>&1; then
  USER_SWITCH=runuser
  EXEC_CMD="runuser -u \"$TARGET_USER\" -- \"$REMOTE_SCRIPT\""
elif command -v su >/dev/null 2>&1; then
  USER_SWITCH=su
  EXEC_CMD="su -c \"$REMOTE_SCRIPT\" \"$TARGET_USER\""
else
  USER_SWITCH=none
  echo "=== Warning: no user switching mechanism available (runuser, su) ===" >&2
  echo "=== Executing as current user: $CURRENT_USER ===" >&2
  EXEC_CMD="\"$REMOTE_SCRIPT\""
fi
echo "{USER_SWITCH_MARKER}$USER_SWITCH"
echo "Running as: $TARGET_USER ($USER_SWITCH)" >&2
if eval "$EXEC_CMD" >&2; then
  echo "=== Execution Success ===" >&2
else
  EXIT_CODE=$?
  {{
    echo "=== Execution Failed (Exit Code: $EXIT_CODE) ==="
    echo "Provisioner: {step}"
    echo "Script: {logical}"
    echo "Remote Script: $REMOTE_SCRIPT"
    echo "Current User: $CURRENT_USER"
    echo "Target User: $TARGET_USER"
    echo "Execution Command: $EXEC_CMD"
  }} >&2
  exit $EXIT_CODE
fi
"#,
        working_directory = single_quote(&provisioner.working_directory),
        remote_dir = single_quote(&remote_dir),
        remote_path = single_quote(&remote_path),
        run_as = single_quote(&provisioner.run_as),
        step = path_safe(step),
        logical = path_safe(&provisioner.script.to_string_lossy()),
    ));

    Ok(RemoteScript {
        remote_dir,
        remote_path,
        body: SecretString::new(body),
    })
}

/// Read the user-switch mechanism from the program's stdout.
pub fn parse_user_switch(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(USER_SWITCH_MARKER))
        .map(str::to_string)
}

/// Keep characters that are inert both in paths and inside double quotes.
fn path_safe(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        .collect()
}

/// A heredoc delimiter that does not occur as a line of `content`.
fn heredoc_delimiter(content: &str) -> String {
    let mut delimiter = "PROVISOR_SCRIPT_EOF".to_string();
    while content.lines().any(|line| line == delimiter) {
        delimiter.push('_');
    }
    delimiter
}
