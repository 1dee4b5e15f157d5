//! Post-processing of generated C text.

use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("formatter `{program}` is not installed")]
    NotFound { program: String },
    #[error("failed to run `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("`{program}` produced non-UTF-8 output")]
    Encoding { program: String },
}

pub trait CodeFormatter {
    fn format(&self, code: &str) -> Result<String, FormatError>;
}

/// Leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CodeFormatter for Identity {
    fn format(&self, code: &str) -> Result<String, FormatError> {
        Ok(code.to_string())
    }
}

/// Pipes text through `astyle`.
#[derive(Debug, Clone)]
pub struct Astyle {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for Astyle {
    fn default() -> Self {
        Self {
            program: "astyle".into(),
            args: vec!["--style=kr".into(), "--indent=spaces=4".into(), "--quiet".into()],
        }
    }
}

impl CodeFormatter for Astyle {
    fn format(&self, code: &str) -> Result<String, FormatError> {
        let program = self.program.clone();
        let spawn_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                FormatError::NotFound {
                    program: program.clone(),
                }
            } else {
                FormatError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Feed stdin from its own thread while stdout is drained, or a
        // filter that streams its output blocks once the pipe fills up.
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|s| {
            let writer = s.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(code.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            (written, output)
        });
        let output = output.map_err(spawn_err)?;
        if !output.status.success() {
            return Err(FormatError::Failed {
                program: program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written.map_err(spawn_err)?;
        String::from_utf8(output.stdout).map_err(|_| FormatError::Encoding { program: program.clone() })
    }
}

/// Format `code`, falling back to the unformatted text when the formatter
/// fails.
pub fn format_or_passthrough(formatter: &dyn CodeFormatter, code: String) -> String {
    match formatter.format(&code) {
        Ok(formatted) => formatted,
        Err(err) => {
            log::warn!("{err}; writing unformatted code");
            code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_through() {
        assert_eq!(Identity.format("int x;").unwrap(), "int x;");
    }

    #[test]
    fn missing_program_falls_back() {
        let formatter = Astyle {
            program: "model2c-no-such-formatter".into(),
            args: Vec::new(),
        };
        match formatter.format("int x;") {
            Err(FormatError::NotFound { program }) => assert_eq!(program, "model2c-no-such-formatter"),
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert_eq!(format_or_passthrough(&formatter, "int x;".into()), "int x;");
    }

    #[test]
    fn large_output_streams_through_the_pipe() {
        let formatter = Astyle {
            program: "cat".into(),
            args: Vec::new(),
        };
        let code = "float w[4] = {1.0f,2.0f,3.0f,4.0f};\n".repeat(20_000);
        match formatter.format(&code) {
            Err(FormatError::NotFound { .. }) => {}
            other => assert_eq!(other.unwrap(), code),
        }
    }
}
