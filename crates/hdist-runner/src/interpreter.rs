//! Recursive interpretation of the command script.
//!
//! Walks the command tree in order, enforcing the structural rules the
//! parser cannot (exactly one kind key, modifier compatibility) and the
//! scope rules: env modifications and `chdir` act on the *current*
//! scope's environment, `commands` recurses on a copy that is discarded
//! on exit, and leaf commands run on a private copy whose only export
//! channel is `to_var`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use hdist_common::constants::PATH_LIST_SEPARATOR;
use hdist_common::log::Logger;
use hdist_core::env::Env;
use hdist_core::error::SpecError;
use hdist_core::jobspec::{CommandNode, NodeKind};
use hdist_core::paths::absolutize;
use hdist_core::subst;
use hdist_core::tools::ToolRegistry;

use crate::RunOptions;
use crate::error::{JobError, Result};
use crate::logpipe::LogPipeRegistry;
use crate::scratch::Scratch;
use crate::{debug, hit, inputs, supervisor};

enum EnvModOp {
    Set,
    Prepend,
    Append,
}

/// State threaded through one run of a command tree.
///
/// The environment is deliberately *not* part of this state — it is
/// passed around as a parameter so scoping stays explicit.
pub(crate) struct CommandTreeExecutor<'a> {
    logger: &'a dyn Logger,
    tools: &'a dyn ToolRegistry,
    scratch: &'a Scratch,
    log_pipes: LogPipeRegistry,
    debug: bool,
    debug_shell: PathBuf,
    last_env: Option<Env>,
}

impl<'a> CommandTreeExecutor<'a> {
    pub fn new(
        logger: &'a dyn Logger,
        tools: &'a dyn ToolRegistry,
        scratch: &'a Scratch,
        options: &RunOptions,
    ) -> Self {
        Self {
            logger,
            tools,
            scratch,
            log_pipes: LogPipeRegistry::new(scratch.path().to_owned()),
            debug: options.debug,
            debug_shell: options.debug_shell.clone(),
            last_env: None,
        }
    }

    /// Returns the node env of the last executed leaf, or an empty map
    /// if no leaf ran.
    pub fn into_last_env(self) -> Env {
        self.last_env.unwrap_or_default()
    }

    /// Executes sibling nodes strictly in order.
    pub fn run_command_list(
        &mut self,
        commands: &[CommandNode],
        env: &mut Env,
        pos: &[usize],
    ) -> Result<()> {
        for (index, node) in commands.iter().enumerate() {
            let mut node_pos = pos.to_vec();
            node_pos.push(index);
            self.run_node(node, env, &node_pos)?;
        }
        Ok(())
    }

    fn run_node(&mut self, node: &CommandNode, env: &mut Env, pos: &[usize]) -> Result<()> {
        let kind = match node.kind() {
            Ok(Some(kind)) => kind,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.logger.error(&err.to_string());
                return Err(err.into());
            }
        };
        if let Err(err) = check_modifiers(node, kind) {
            self.logger.error(&err.to_string());
            return Err(err.into());
        }

        match kind {
            NodeKind::Commands => {
                let sub_commands = node.commands.as_deref().unwrap_or_default();
                // A fresh scope: every mutation below is discarded,
                // except what leaves export via `to_var` into it.
                let mut sub_env = env.clone();
                self.run_command_list(sub_commands, &mut sub_env, pos)
            }
            NodeKind::Chdir => self.handle_chdir(node, env),
            NodeKind::Set => {
                let name = node.set.clone().unwrap_or_default();
                self.env_mod(node, env, &name, &EnvModOp::Set, "")
            }
            NodeKind::PrependPath => {
                let name = node.prepend_path.clone().unwrap_or_default();
                self.env_mod(node, env, &name, &EnvModOp::Prepend, PATH_LIST_SEPARATOR)
            }
            NodeKind::AppendPath => {
                let name = node.append_path.clone().unwrap_or_default();
                self.env_mod(node, env, &name, &EnvModOp::Append, PATH_LIST_SEPARATOR)
            }
            NodeKind::PrependFlag => {
                let name = node.prepend_flag.clone().unwrap_or_default();
                self.env_mod(node, env, &name, &EnvModOp::Prepend, " ")
            }
            NodeKind::AppendFlag => {
                let name = node.append_flag.clone().unwrap_or_default();
                self.env_mod(node, env, &name, &EnvModOp::Append, " ")
            }
            NodeKind::Cmd | NodeKind::Hit => self.handle_leaf(node, env, pos, kind),
        }
    }

    fn handle_chdir(&self, node: &CommandNode, env: &mut Env) -> Result<()> {
        let raw = node.chdir.clone().unwrap_or_default();
        let dir = self.substitute(&raw, env)?;
        let pwd = current_pwd(env)?;
        let next = absolutize(Path::new(&pwd), Path::new(&dir));
        let _ = env.insert("PWD".to_owned(), next.display().to_string());
        Ok(())
    }

    fn env_mod(
        &self,
        node: &CommandNode,
        env: &mut Env,
        name: &str,
        op: &EnvModOp,
        separator: &str,
    ) -> Result<()> {
        let Some(raw) = node.nohash_value.as_ref().or(node.value.as_ref()) else {
            // check_modifiers already requires one of the two.
            return Ok(());
        };
        let value = self.substitute(raw, env)?;
        let current = env.get(name).map(String::as_str).unwrap_or_default();
        let next = match op {
            // An absent or empty target behaves like `set`.
            _ if current.is_empty() => value,
            EnvModOp::Set => value,
            EnvModOp::Prepend => format!("{value}{separator}{current}"),
            EnvModOp::Append => format!("{current}{separator}{value}"),
        };
        let _ = env.insert(name.to_owned(), next);
        Ok(())
    }

    fn handle_leaf(
        &mut self,
        node: &CommandNode,
        env: &mut Env,
        pos: &[usize],
        kind: NodeKind,
    ) -> Result<()> {
        let mut node_env = env.clone();
        if let Some(specs) = &node.inputs {
            for (name, path) in inputs::dump_inputs(self.scratch.path(), specs, pos)? {
                let _ = node_env.insert(name, path);
            }
        }

        let raw_args = match kind {
            NodeKind::Cmd => node.cmd.as_deref(),
            _ => node.hit.as_deref(),
        }
        .unwrap_or_default();
        if raw_args.is_empty() {
            let err = SpecError::InvalidJobSpec(
                "cmd/hit requires a non-empty argument list".to_owned(),
            );
            self.logger.error(&err.to_string());
            return Err(err.into());
        }
        let args = raw_args
            .iter()
            .map(|arg| self.substitute(arg, &node_env))
            .collect::<Result<Vec<String>>>()?;
        let is_cmd = kind == NodeKind::Cmd;

        if let Some(var) = &node.to_var {
            let mut sink = Vec::new();
            self.run_leaf(is_cmd, &args, &node_env, Some(&mut sink as &mut dyn Write))?;
            let value = String::from_utf8_lossy(&sink).trim().to_owned();
            // The sole channel by which a leaf exports into its scope.
            let _ = env.insert(var.clone(), value);
        } else if let Some(raw_target) = &node.append_to_file {
            let target = self.substitute(raw_target, &node_env)?;
            let pwd = current_pwd(&node_env)?;
            let path = absolutize(Path::new(&pwd), Path::new(&target));
            if path.starts_with(self.scratch.path()) {
                // Writing into the scratch dir can deadlock against a
                // log pipe; writes from the child itself are fine.
                let err = JobError::RedirectToTempForbidden { path };
                self.logger.error(&err.to_string());
                return Err(err);
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| JobError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            self.run_leaf(is_cmd, &args, &node_env, Some(&mut file as &mut dyn Write))?;
        } else if self.debug && is_cmd {
            debug::debug_call(self.logger, &self.debug_shell, &args, &node_env)?;
        } else {
            self.run_leaf(is_cmd, &args, &node_env, None)?;
        }

        self.last_env = Some(node_env);
        Ok(())
    }

    fn run_leaf(
        &mut self,
        is_cmd: bool,
        args: &[String],
        node_env: &Env,
        capture: Option<&mut dyn Write>,
    ) -> Result<()> {
        if is_cmd {
            self.logger.debug(&format!("running {args:?}"));
            self.logger.debug("environment:");
            for (key, value) in node_env {
                self.logger.debug(&format!("  {key}={value}"));
            }
            supervisor::run(self.logger, &self.log_pipes, args, node_env, capture, false)
        } else {
            hit::run_hit(
                self.logger,
                self.tools,
                &mut self.log_pipes,
                args,
                node_env,
                capture,
            )
        }
    }

    fn substitute(&self, input: &str, env: &Env) -> Result<String> {
        subst::substitute(input, env).map_err(|err| {
            self.logger.error(&err.to_string());
            JobError::from(err)
        })
    }
}

fn current_pwd(env: &Env) -> Result<String> {
    env.get("PWD")
        .cloned()
        .ok_or_else(|| JobError::Spec(SpecError::UnknownVariable("PWD".to_owned())))
}

/// Enforces the cross-field rules that depend on the node's kind.
fn check_modifiers(node: &CommandNode, kind: NodeKind) -> std::result::Result<(), SpecError> {
    if node.to_var.is_some() && node.append_to_file.is_some() {
        return Err(SpecError::InvalidJobSpec(
            "to_var and append_to_file are mutually exclusive".to_owned(),
        ));
    }
    if !kind.is_leaf_command() {
        for (field, present) in [
            ("to_var", node.to_var.is_some()),
            ("append_to_file", node.append_to_file.is_some()),
            ("inputs", node.inputs.is_some()),
        ] {
            if present {
                return Err(SpecError::InvalidJobSpec(format!(
                    "'{field}' is only allowed on cmd/hit nodes"
                )));
            }
        }
    }
    if kind.is_env_mod() {
        if node.value.is_none() && node.nohash_value.is_none() {
            return Err(SpecError::InvalidJobSpec(
                "environment modification needs 'value' or 'nohash_value'".to_owned(),
            ));
        }
    } else if node.value.is_some() || node.nohash_value.is_some() {
        return Err(SpecError::InvalidJobSpec(
            "'value' is only allowed on environment-modification nodes".to_owned(),
        ));
    }
    Ok(())
}
