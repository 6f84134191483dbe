//! In-process dispatch of `hit` script nodes.
//!
//! `hit` nodes never fork. `hit logpipe <HEADER> <LEVEL>` is intercepted
//! here and handled by the log-pipe registry; everything else goes to the
//! caller's [`ToolRegistry`] with an explicit stdout sink, a scoped
//! working directory, and temporarily lowered job-log verbosity.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use hdist_common::log::{LogLevel, Logger};
use hdist_core::env::Env;
use hdist_core::error::SpecError;
use hdist_core::tools::ToolRegistry;

use crate::error::{JobError, Result};
use crate::logpipe::LogPipeRegistry;

pub(crate) fn run_hit(
    logger: &dyn Logger,
    tools: &dyn ToolRegistry,
    pipes: &mut LogPipeRegistry,
    args: &[String],
    env: &Env,
    capture: Option<&mut dyn Write>,
) -> Result<()> {
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push("hit".to_owned());
    argv.extend(args.iter().cloned());
    logger.debug(&format!("running {argv:?}"));

    // Tools stay quiet unless the job log is already at DEBUG.
    let _quiet = VerbosityGuard::lower(logger);

    if argv.get(1).map(String::as_str) == Some("logpipe") {
        create_log_pipe(logger, pipes, &argv, capture)
    } else {
        dispatch_tool(logger, tools, &argv, env, capture)
    }
}

fn create_log_pipe(
    logger: &dyn Logger,
    pipes: &mut LogPipeRegistry,
    argv: &[String],
    capture: Option<&mut dyn Write>,
) -> Result<()> {
    if argv.len() != 4 {
        let err = SpecError::InvalidJobSpec(
            "wrong number of arguments to \"hit logpipe\"".to_owned(),
        );
        logger.error(&err.to_string());
        return Err(err.into());
    }
    let level: LogLevel = argv[3].parse::<LogLevel>().map_err(|e| {
        let err = SpecError::InvalidJobSpec(e.to_string());
        logger.error(&err.to_string());
        JobError::from(err)
    })?;
    let path = pipes.create(&argv[2], level)?;

    // The path is the tool's stdout: the shell-visible value the
    // enclosing script consumes, typically via `to_var`.
    let rendered = path.display().to_string();
    match capture {
        Some(sink) => sink
            .write_all(rendered.as_bytes())
            .map_err(|e| JobError::Io {
                path: path.clone(),
                source: e,
            }),
        None => io::stdout()
            .write_all(rendered.as_bytes())
            .map_err(|e| JobError::Io {
                path: path.clone(),
                source: e,
            }),
    }
}

fn dispatch_tool(
    logger: &dyn Logger,
    tools: &dyn ToolRegistry,
    argv: &[String],
    env: &Env,
    capture: Option<&mut dyn Write>,
) -> Result<()> {
    let pwd = env
        .get("PWD")
        .cloned()
        .ok_or_else(|| JobError::Spec(SpecError::UnknownVariable("PWD".to_owned())))?;
    let _cwd = WorkingDirGuard::enter(Path::new(&pwd))?;

    let outcome = match capture {
        Some(sink) => tools.run(argv, env, logger, sink),
        None => tools.run(argv, env, logger, &mut io::stdout()),
    };
    match outcome {
        Ok(0) => Ok(()),
        Ok(code) => {
            logger.error(&format!("hit command failed with code: {code}"));
            Err(JobError::HitFailed(format!("exit code {code}")))
        }
        Err(e) => {
            logger.error(&format!("hit command failed: {e}"));
            Err(JobError::HitFailed(e.to_string()))
        }
    }
}

/// Restores the job-log level when dropped.
struct VerbosityGuard<'a> {
    logger: &'a dyn Logger,
    previous: LogLevel,
}

impl<'a> VerbosityGuard<'a> {
    fn lower(logger: &'a dyn Logger) -> Self {
        let previous = logger.level();
        if previous > LogLevel::Debug {
            logger.set_level(LogLevel::Warning);
        }
        Self { logger, previous }
    }
}

impl Drop for VerbosityGuard<'_> {
    fn drop(&mut self) {
        self.logger.set_level(self.previous);
    }
}

/// Restores the process working directory when dropped.
struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    fn enter(dir: &Path) -> Result<Self> {
        let previous = std::env::current_dir().map_err(|e| JobError::Io {
            path: PathBuf::from("."),
            source: e,
        })?;
        std::env::set_current_dir(dir).map_err(|e| JobError::Io {
            path: dir.to_owned(),
            source: e,
        })?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

#[cfg(test)]
mod tests {
    use hdist_common::error::HdistError;
    use hdist_common::log::MemoryLogger;
    use hdist_core::tools::NoTools;

    use super::*;

    fn env_at(pwd: &str) -> Env {
        let mut env = Env::new();
        let _ = env.insert("PWD".to_owned(), pwd.to_owned());
        env
    }

    #[test]
    fn logpipe_writes_the_fifo_path_to_the_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut pipes = LogPipeRegistry::new(dir.path().to_owned());
        let mut sink = Vec::new();
        run_hit(
            &logger,
            &NoTools,
            &mut pipes,
            &["logpipe".to_owned(), "build".to_owned(), "INFO".to_owned()],
            &env_at("/"),
            Some(&mut sink),
        )
        .expect("logpipe");
        let rendered = String::from_utf8_lossy(&sink);
        assert!(rendered.ends_with("logpipe-build-INFO"));
    }

    #[test]
    fn logpipe_rejects_wrong_arity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut pipes = LogPipeRegistry::new(dir.path().to_owned());
        let err = run_hit(
            &logger,
            &NoTools,
            &mut pipes,
            &["logpipe".to_owned(), "build".to_owned()],
            &env_at("/"),
            None,
        )
        .expect_err("must refuse");
        assert!(err.to_string().contains("wrong number of arguments"));
    }

    #[test]
    fn logpipe_rejects_unknown_level_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut pipes = LogPipeRegistry::new(dir.path().to_owned());
        let err = run_hit(
            &logger,
            &NoTools,
            &mut pipes,
            &["logpipe".to_owned(), "build".to_owned(), "NOTICE".to_owned()],
            &env_at("/"),
            None,
        )
        .expect_err("must refuse");
        assert!(matches!(err, JobError::Spec(SpecError::InvalidJobSpec(_))));
    }

    #[test]
    fn unknown_tools_surface_as_hit_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut pipes = LogPipeRegistry::new(dir.path().to_owned());
        let err = run_hit(
            &logger,
            &NoTools,
            &mut pipes,
            &["frobnicate".to_owned()],
            &env_at("/"),
            None,
        )
        .expect_err("must fail");
        assert!(matches!(err, JobError::HitFailed(_)));
        assert!(
            logger
                .lines_at(LogLevel::Error)
                .iter()
                .any(|l| l.contains("hit command failed"))
        );
    }

    #[test]
    fn verbosity_is_restored_after_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        logger.set_level(LogLevel::Info);
        let mut pipes = LogPipeRegistry::new(dir.path().to_owned());
        let _ = run_hit(
            &logger,
            &NoTools,
            &mut pipes,
            &["frobnicate".to_owned()],
            &env_at("/"),
            None,
        );
        assert_eq!(logger.level(), LogLevel::Info);
    }

    /// Registry standing in for a tool that inspects its arguments.
    struct EchoTool;

    impl ToolRegistry for EchoTool {
        fn run(
            &self,
            argv: &[String],
            _env: &Env,
            _logger: &dyn Logger,
            stdout: &mut dyn Write,
        ) -> hdist_common::error::Result<i32> {
            stdout
                .write_all(argv.join(" ").as_bytes())
                .map_err(|e| HdistError::Io {
                    path: PathBuf::from("stdout"),
                    source: e,
                })?;
            Ok(0)
        }
    }

    #[test]
    fn tool_argv_is_prefixed_with_hit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut pipes = LogPipeRegistry::new(dir.path().to_owned());
        let mut sink = Vec::new();
        run_hit(
            &logger,
            &EchoTool,
            &mut pipes,
            &["show".to_owned(), "--flag".to_owned()],
            &env_at("/"),
            Some(&mut sink),
        )
        .expect("tool runs");
        assert_eq!(String::from_utf8_lossy(&sink), "hit show --flag");
    }
}
