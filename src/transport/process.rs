//! Process transport driving the `multiflexi-cli` tool.
//!
//! Every call spawns `{cli} {noun} {verb} --flag value ... --format json` and
//! reads the JSON document the tool prints on stdout.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{BackendError, Result};
use crate::resource::{render_scalar, IdentityKey, Record, ResourceKind, ResourceProfile};

use super::{
    interpret_list, interpret_lookup, is_not_found_marker, parse_body, Invocation, Lookup,
    MutationRequest, Transport, Verb, Verbosity,
};

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Placeholder printed instead of secret flag values.
const REDACTED: &str = "********";

/// Flag name fragments whose values are never logged.
const SECRET_FLAGS: &[&str] = &["password", "token", "secret"];

/// Runs `multiflexi-cli` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    /// Program to run.
    program: String,
    /// Maximum run time of one invocation.
    timeout: Duration,
    /// Diagnostics level.
    verbosity: Verbosity,
}

impl ProcessTransport {
    /// Creates a transport running the given program.
    #[must_use]
    pub fn new(program: &str, verbosity: Verbosity) -> Self {
        Self {
            program: program.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            verbosity,
        }
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    /// Runs the program with `args` and returns its stdout.
    ///
    /// When `tolerate_not_found` is set, a failing run whose stdout carries the
    /// "not found" marker is returned as a success so the caller can map it.
    async fn run(&self, args: Vec<String>, tolerate_not_found: bool) -> Result<String> {
        let command_line = self.command_line(&args);
        if self.verbosity.logs_requests() {
            debug!("Running {command_line}");
        }

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackendError::SpawnFailed {
                    program: self.program.clone(),
                    message: e.to_string(),
                }
                .into());
            }
            Err(_) => {
                return Err(BackendError::command_failed(
                    command_line,
                    None,
                    format!("timed out after {} seconds", self.timeout.as_secs()),
                )
                .into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if self.verbosity.logs_payloads() {
            trace!("exit={:?} stdout={stdout} stderr={stderr}", output.status.code());
        }

        if output.status.success() {
            return Ok(stdout);
        }

        if tolerate_not_found
            && parse_body(&stdout).is_ok_and(|value| is_not_found_marker(&value))
        {
            return Ok(stdout);
        }

        let message = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };

        Err(BackendError::command_failed(command_line, output.status.code(), message).into())
    }

    /// Renders the command line with secret values masked.
    fn command_line(&self, args: &[String]) -> String {
        let mut rendered = Vec::with_capacity(args.len() + 1);
        rendered.push(self.program.clone());

        let mut mask_next = false;
        for arg in args {
            if mask_next {
                rendered.push(REDACTED.to_string());
                mask_next = false;
                continue;
            }
            if let Some(flag) = arg.strip_prefix("--") {
                mask_next = is_secret_flag(flag);
            }
            rendered.push(arg.clone());
        }

        rendered.join(" ")
    }
}

fn is_secret_flag(flag: &str) -> bool {
    let flag = flag.to_ascii_lowercase();
    SECRET_FLAGS.iter().any(|s| flag.contains(s))
}

fn push_fields(args: &mut Vec<String>, profile: &ResourceProfile, fields: &Record) {
    for (field, value) in fields {
        args.push(profile.cli_flag(field));
        args.push(render_scalar(value));
    }
}

fn cli_verb(profile: &ResourceProfile, verb: Verb) -> String {
    match verb {
        Verb::Remove => profile.remove_verb.to_string(),
        verb => verb.to_string(),
    }
}

fn with_format(mut args: Vec<String>) -> Vec<String> {
    args.push(String::from("--format"));
    args.push(String::from("json"));
    args
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn lookup(&self, kind: ResourceKind, key: &IdentityKey) -> Result<Lookup> {
        let profile = kind.profile();
        let args = with_format(vec![
            profile.cli_noun.to_string(),
            String::from("get"),
            profile.cli_flag(&key.name),
            render_scalar(&key.value),
        ]);
        let stdout = self.run(args, true).await?;
        interpret_lookup(parse_body(&stdout)?)
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>> {
        let args = with_format(vec![
            kind.profile().cli_noun.to_string(),
            String::from("list"),
        ]);
        let stdout = self.run(args, false).await?;
        interpret_list(parse_body(&stdout)?)
    }

    async fn mutate(&self, request: &MutationRequest) -> Result<Value> {
        let profile = request.kind.profile();
        let mut args = vec![profile.cli_noun.to_string(), cli_verb(profile, request.verb)];
        if request.verb != Verb::Create {
            if let Some(id) = &request.target {
                args.push(String::from("--id"));
                args.push(render_scalar(id));
            }
        }
        push_fields(&mut args, profile, &request.fields);

        let stdout = self.run(with_format(args), false).await?;
        // Some commands print a plain confirmation line instead of JSON.
        Ok(parse_body(&stdout).unwrap_or_else(|_| Value::String(stdout.trim().to_string())))
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<Value> {
        let mut args = invocation.command.clone();
        for (name, value) in &invocation.flags {
            args.push(format!("--{name}"));
            if let Some(value) = value {
                args.push(value.clone());
            }
        }

        let stdout = self.run(with_format(args), false).await?;
        Ok(parse_body(&stdout).unwrap_or_else(|_| Value::String(stdout.trim().to_string())))
    }

    fn name(&self) -> &'static str {
        "cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MultiflexiError;
    use serde_json::json;

    #[test]
    fn test_command_line_masks_secrets() {
        let transport = ProcessTransport::new("multiflexi-cli", Verbosity::Normal);
        let line = transport.command_line(&[
            String::from("user"),
            String::from("create"),
            String::from("--login"),
            String::from("jdoe"),
            String::from("--password"),
            String::from("hunter2"),
        ]);
        assert_eq!(
            line,
            "multiflexi-cli user create --login jdoe --password ********"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let transport =
            ProcessTransport::new("/nonexistent/multiflexi-cli", Verbosity::Normal);
        let err = transport
            .list(ResourceKind::Company)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            MultiflexiError::Backend(BackendError::SpawnFailed { .. })
        ));
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};
        use tempfile::TempDir;

        /// Writes an executable shell script standing in for `multiflexi-cli`.
        /// Every invocation appends its arguments to `calls.log`.
        fn fake_cli(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("multiflexi-cli");
            let log = dir.join("calls.log");
            let script = format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\n{body}\n",
                log.display()
            );
            std::fs::write(&path, script).expect("write script");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
            path
        }

        fn calls(dir: &Path) -> Vec<String> {
            std::fs::read_to_string(dir.join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn transport(path: &Path) -> ProcessTransport {
            ProcessTransport::new(path.to_str().expect("utf-8 path"), Verbosity::Trace)
                .with_timeout(10)
        }

        #[tokio::test]
        async fn test_lookup_found() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), r#"echo '{"id": 5, "name": "Acme"}'"#);

            let record = transport(&cli)
                .lookup(ResourceKind::Company, &IdentityKey::new("name", "Acme"))
                .await
                .expect("lookup")
                .into_record()
                .expect("found");

            assert_eq!(record.get("id"), Some(&json!(5)));
            assert_eq!(
                calls(dir.path()),
                vec!["company get --name Acme --format json"]
            );
        }

        #[tokio::test]
        async fn test_not_found_marker_on_failed_exit() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(
                dir.path(),
                "echo '{\"status\": \"not found\"}'\nexit 1",
            );

            let lookup = transport(&cli)
                .lookup(ResourceKind::RunTemplate, &IdentityKey::new("id", 42))
                .await
                .expect("lookup");
            assert_eq!(lookup, Lookup::NotFound);
        }

        #[tokio::test]
        async fn test_empty_list_lookup_is_not_found() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), "echo '[]'");

            let lookup = transport(&cli)
                .lookup(ResourceKind::User, &IdentityKey::new("login", "ghost"))
                .await
                .expect("lookup");
            assert_eq!(lookup, Lookup::NotFound);
        }

        #[tokio::test]
        async fn test_failure_carries_stderr_and_exit_code() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(
                dir.path(),
                "echo 'SQLSTATE[42S02]: table missing' >&2\nexit 3",
            );

            let err = transport(&cli)
                .list(ResourceKind::Application)
                .await
                .expect_err("should fail");
            assert_eq!(err.return_code(), Some(3));
            assert_eq!(
                err.to_string(),
                "multiflexi-cli error: SQLSTATE[42S02]: table missing"
            );
        }

        #[tokio::test]
        async fn test_malformed_json_is_backend_error() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), "echo 'Warning: something odd'");

            let err = transport(&cli)
                .lookup(ResourceKind::Company, &IdentityKey::new("id", 1))
                .await
                .expect_err("should fail");
            assert!(matches!(
                err,
                MultiflexiError::Backend(BackendError::InvalidResponse { .. })
            ));
        }

        #[tokio::test]
        async fn test_update_passes_id_and_dashed_fields() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), r#"echo '{"updated": true}'"#);

            let mut fields = Record::new();
            fields.insert(String::from("active"), json!(true));
            fields.insert(String::from("cron_expr"), json!("*/5 * * * *"));

            transport(&cli)
                .mutate(&MutationRequest::update(
                    ResourceKind::RunTemplate,
                    json!(7),
                    fields,
                ))
                .await
                .expect("update");

            assert_eq!(
                calls(dir.path()),
                vec!["runtemplate update --id 7 --active true --cron-expr */5 * * * * --format json"]
            );
        }

        #[tokio::test]
        async fn test_token_create_uses_user_flag() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), r#"echo '{"id": 11, "user_id": 3}'"#);

            let mut fields = Record::new();
            fields.insert(String::from("user_id"), json!(3));

            transport(&cli)
                .mutate(&MutationRequest::create(ResourceKind::Token, fields))
                .await
                .expect("create");

            assert_eq!(
                calls(dir.path()),
                vec!["token create --user 3 --format json"]
            );
        }

        #[tokio::test]
        async fn test_company_app_uses_underscore_flags_and_delete() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), r#"echo '{"id": 12}'"#);
            let transport = transport(&cli);

            let mut fields = Record::new();
            fields.insert(String::from("app_uuid"), json!("6b3c"));
            fields.insert(String::from("company_id"), json!(2));
            transport
                .mutate(&MutationRequest::create(ResourceKind::CompanyApp, fields))
                .await
                .expect("create");
            transport
                .mutate(&MutationRequest::remove(ResourceKind::CompanyApp, json!(12)))
                .await
                .expect("remove");

            assert_eq!(
                calls(dir.path()),
                vec![
                    "companyapp create --app_uuid 6b3c --company_id 2 --format json",
                    "companyapp delete --id 12 --format json",
                ]
            );
        }

        #[tokio::test]
        async fn test_company_lookup_by_ic() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), r#"echo '{"id": 4, "ic": "12345678"}'"#);

            let lookup = transport(&cli)
                .lookup(ResourceKind::Company, &IdentityKey::new("ic", "12345678"))
                .await
                .expect("lookup");

            assert!(lookup.into_record().is_some());
            assert_eq!(
                calls(dir.path()),
                vec!["company get --ic 12345678 --format json"]
            );
        }

        #[tokio::test]
        async fn test_invoke_runs_command_with_flags() {
            let dir = TempDir::new().expect("tempdir");
            let cli = fake_cli(dir.path(), r#"echo '{"truncated": 12}'"#);

            let transport = transport(&cli);
            let response = transport
                .invoke(&Invocation::new(["queue", "truncate"]))
                .await
                .expect("invoke");
            transport
                .invoke(&Invocation::new(["artifact", "list"]).flag("job_id", "123"))
                .await
                .expect("invoke");

            assert_eq!(response, json!({ "truncated": 12 }));
            assert_eq!(
                calls(dir.path()),
                vec![
                    "queue truncate --format json",
                    "artifact list --job_id 123 --format json",
                ]
            );
        }
    }
}
