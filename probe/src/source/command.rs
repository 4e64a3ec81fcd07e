use super::MetricSource;
use crate::config::{ConfigError, SourceConfig};
use crate::error::SourceError;
use std::process::{Command, Output};

/// Shells out to external tools for liveness and counter reads.
///
/// `read_command` is an argv template; `{process}` and `{counter}` are
/// substituted in every argument before the command runs.
#[derive(Debug, Clone)]
pub struct CommandSource {
    list_command: Vec<String>,
    read_command: Vec<String>,
}

impl CommandSource {
    pub fn new(list_command: Vec<String>, read_command: Vec<String>) -> Result<Self, ConfigError> {
        if list_command.is_empty() {
            return Err(ConfigError::Invalid("source.list_command is empty".to_string()));
        }
        if read_command.is_empty() {
            return Err(ConfigError::Invalid("source.read_command is empty".to_string()));
        }
        Ok(Self { list_command, read_command })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        Self::new(config.list_command.clone(), config.read_command.clone())
    }

    fn render(&self, process_name: &str, counter: &str) -> Vec<String> {
        self.read_command
            .iter()
            .map(|arg| arg.replace("{process}", process_name).replace("{counter}", counter))
            .collect()
    }

    fn run(argv: &[String]) -> std::io::Result<Output> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;
        Command::new(program).args(args).output()
    }

    fn describe_failure(output: &Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        format!("{}: {}", output.status, detail.trim())
    }
}

impl MetricSource for CommandSource {
    fn is_running(&self, process_name: &str) -> Result<bool, SourceError> {
        let output = Self::run(&self.list_command)
            .map_err(|e| SourceError::LivenessCheckFailure(format!("{}: {}", self.list_command[0], e)))?;
        if !output.status.success() {
            return Err(SourceError::LivenessCheckFailure(Self::describe_failure(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).contains(process_name))
    }

    fn read_counter(&self, process_name: &str, counter: &str) -> Result<String, SourceError> {
        let argv = self.render(process_name, counter);
        let output = Self::run(&argv)
            .map_err(|e| SourceError::ReadFailure(format!("{}: {}", argv[0], e)))?;
        if !output.status.success() {
            return Err(SourceError::ReadFailure(Self::describe_failure(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn rejects_empty_commands() {
        assert!(CommandSource::new(vec![], sh("echo 1")).is_err());
        assert!(CommandSource::new(sh("echo x"), vec![]).is_err());
    }

    #[test]
    fn liveness_matches_substring_of_listing() {
        let source = CommandSource::new(sh("printf 'init\\nmyservice.exe\\n'"), sh("echo 1")).unwrap();
        assert!(source.is_running("myservice").unwrap());
        assert!(!source.is_running("other").unwrap());
    }

    #[test]
    fn failed_listing_is_a_liveness_failure() {
        let source = CommandSource::new(sh("exit 3"), sh("echo 1")).unwrap();
        assert!(matches!(
            source.is_running("x"),
            Err(SourceError::LivenessCheckFailure(_))
        ));
    }

    #[test]
    fn read_substitutes_placeholders() {
        let source = CommandSource::new(sh("true"), sh("echo '{process}|{counter}'")).unwrap();
        let raw = source.read_counter("app", "Thread count").unwrap();
        assert_eq!(raw.trim(), "app|Thread count");
    }

    #[test]
    fn non_zero_exit_is_a_read_failure_with_output() {
        let source = CommandSource::new(sh("true"), sh("echo counter gone >&2; exit 1")).unwrap();
        match source.read_counter("app", "Handle count") {
            Err(SourceError::ReadFailure(msg)) => assert!(msg.contains("counter gone")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_a_read_failure() {
        let source = CommandSource::new(
            sh("true"),
            vec!["/nonexistent/counter-tool".to_string()],
        )
        .unwrap();
        assert!(matches!(
            source.read_counter("app", "cpu"),
            Err(SourceError::ReadFailure(_))
        ));
    }
}
