//! The hashable job specification.
//!
//! A job spec is a JSON document with an ordered `import` list and a
//! `commands` script tree. Parsing rejects unknown keys; the structural
//! rules that depend on key *combinations* (exactly one kind key per
//! node, modifier compatibility) are checked at interpretation time so
//! the error can name the offending node.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use hdist_common::types::{ArtifactId, Sha256Hash};

use crate::error::{Result, SpecError};

/// A complete job specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSpec {
    /// Artifacts to make available in the job environment, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub import: Vec<Import>,

    /// The command script. An absent key is distinct from an empty list:
    /// imports are validated either way, but nothing is executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<CommandNode>>,
}

/// One artifact import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Import {
    /// Artifact id, possibly `virtual:<tag>`.
    pub id: ArtifactId,

    /// Name under which `<REF>_DIR` and `<REF>_ID` are bound; absent
    /// means "import but bind no variables". The empty string is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
}

/// One node of the command script.
///
/// Exactly one *kind key* selects the node type; every other field is a
/// modifier. An entirely empty node is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandNode {
    /// Sub-list introducing a new scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<CommandNode>>,

    /// Argv for a child process; no quoting or globbing is applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    /// Argv for the in-process `hit` tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<Vec<String>>,

    /// Overwrite the named variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,

    /// Prepend to a pathsep-joined variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepend_path: Option<String>,

    /// Append to a pathsep-joined variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_path: Option<String>,

    /// Prepend to a space-joined variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepend_flag: Option<String>,

    /// Append to a space-joined variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_flag: Option<String>,

    /// Change the scope's working directory, relative to the current one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chdir: Option<String>,

    /// Value for env-modification kinds; enters the spec hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Value for env-modification kinds that is excluded from the spec
    /// hash; wins over `value` when both are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nohash_value: Option<String>,

    /// Inline payloads materialized as `$in0`, `$in1`, … for this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<InputSpec>>,

    /// Capture stdout (stripped) into the named variable of the
    /// enclosing scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_var: Option<String>,

    /// Redirect stdout in append mode to the named file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_to_file: Option<String>,
}

/// The node type selected by a kind key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// `commands` sub-list.
    Commands,
    /// `cmd` child process.
    Cmd,
    /// `hit` in-process tool.
    Hit,
    /// `set` env modification.
    Set,
    /// `prepend_path` env modification.
    PrependPath,
    /// `append_path` env modification.
    AppendPath,
    /// `prepend_flag` env modification.
    PrependFlag,
    /// `append_flag` env modification.
    AppendFlag,
    /// `chdir` working-directory change.
    Chdir,
}

impl NodeKind {
    /// Returns whether this kind modifies an environment variable.
    #[must_use]
    pub fn is_env_mod(self) -> bool {
        matches!(
            self,
            Self::Set
                | Self::PrependPath
                | Self::AppendPath
                | Self::PrependFlag
                | Self::AppendFlag
        )
    }

    /// Returns whether this kind runs something (`cmd` or `hit`).
    #[must_use]
    pub fn is_leaf_command(self) -> bool {
        matches!(self, Self::Cmd | Self::Hit)
    }
}

impl CommandNode {
    /// Builds a `{set: <name>, value: <value>}` node.
    #[must_use]
    pub fn set_var(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            set: Some(name.into()),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Determines the node's kind.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::InvalidJobSpec`] if more than one kind key is
    /// present, or if the node carries modifiers without any kind key.
    /// An entirely empty node yields `Ok(None)`.
    pub fn kind(&self) -> Result<Option<NodeKind>> {
        let mut present: Vec<(NodeKind, &'static str)> = Vec::new();
        if self.commands.is_some() {
            present.push((NodeKind::Commands, "commands"));
        }
        if self.cmd.is_some() {
            present.push((NodeKind::Cmd, "cmd"));
        }
        if self.hit.is_some() {
            present.push((NodeKind::Hit, "hit"));
        }
        if self.set.is_some() {
            present.push((NodeKind::Set, "set"));
        }
        if self.prepend_path.is_some() {
            present.push((NodeKind::PrependPath, "prepend_path"));
        }
        if self.append_path.is_some() {
            present.push((NodeKind::AppendPath, "append_path"));
        }
        if self.prepend_flag.is_some() {
            present.push((NodeKind::PrependFlag, "prepend_flag"));
        }
        if self.append_flag.is_some() {
            present.push((NodeKind::AppendFlag, "append_flag"));
        }
        if self.chdir.is_some() {
            present.push((NodeKind::Chdir, "chdir"));
        }

        match present.as_slice() {
            [] if *self == Self::default() => Ok(None),
            [] => Err(SpecError::InvalidJobSpec(
                "node must be empty or have exactly one kind key \
                 (commands, cmd, hit, set, prepend_path, append_path, \
                 prepend_flag, append_flag, chdir)"
                    .to_owned(),
            )),
            [(kind, _)] => Ok(Some(*kind)),
            [(_, first), (_, second), ..] => Err(SpecError::InvalidJobSpec(format!(
                "several action types present: {first} and {second}"
            ))),
        }
    }
}

/// One inline input payload.
///
/// Exactly one of the three fields must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSpec {
    /// Lines joined with `\n`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<String>>,

    /// Raw payload written verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,

    /// Arbitrary document, pretty-serialized; the materialized file
    /// gains a `.json` suffix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl InputSpec {
    /// Renders the payload, returning it together with whether the file
    /// name needs a `.json` suffix.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::InvalidJobSpec`] unless exactly one of
    /// `text`, `string`, `json` is present.
    pub fn render(&self) -> Result<(String, bool)> {
        match (&self.text, &self.string, &self.json) {
            (Some(lines), None, None) => Ok((lines.join("\n"), false)),
            (None, Some(raw), None) => Ok((raw.clone(), false)),
            (None, None, Some(doc)) => {
                let payload = serde_json::to_string_pretty(doc).map_err(|e| {
                    SpecError::InvalidJobSpec(format!("unserializable json input: {e}"))
                })?;
                Ok((payload, true))
            }
            _ => Err(SpecError::InvalidJobSpec(
                "input entry needs exactly one of 'text', 'string', 'json'".to_owned(),
            )),
        }
    }
}

/// Returns a copy of the spec with defaults filled in.
///
/// The `import` list defaults to empty and every import's `ref` defaults
/// to absent; canonicalizing an already-canonical spec is a no-op.
///
/// # Errors
///
/// Returns [`SpecError::InvalidJobSpec`] for an empty-string `ref`,
/// which must be expressed as an absent key instead.
pub fn canonicalize_job_spec(spec: &JobSpec) -> Result<JobSpec> {
    for import in &spec.import {
        if import.r#ref.as_deref() == Some("") {
            return Err(SpecError::InvalidJobSpec(format!(
                "import {}: empty ref should be absent, not \"\"",
                import.id
            )));
        }
    }
    Ok(spec.clone())
}

/// Computes the identity hash of a job spec.
///
/// The hash covers a canonical compact-JSON rendering with sorted keys,
/// with every `nohash_value` dropped. Virtual import ids are hashed
/// unsubstituted, so the caller-supplied mapping cannot perturb the
/// result.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn spec_hash(spec: &JobSpec) -> hdist_common::error::Result<Sha256Hash> {
    let mut doc = serde_json::to_value(spec)?;
    if let Some(commands) = doc.get_mut("commands").and_then(serde_json::Value::as_array_mut) {
        for node in commands {
            strip_nohash(node);
        }
    }
    let canonical = serde_json::to_string(&doc)?;
    let digest = Sha256::digest(canonical.as_bytes());
    let hash = Sha256Hash::from_hex(format!("{digest:x}"))?;
    tracing::debug!(hash = %hash, "computed job-spec hash");
    Ok(hash)
}

fn strip_nohash(node: &mut serde_json::Value) {
    if let Some(object) = node.as_object_mut() {
        let _ = object.remove("nohash_value");
        if let Some(sub) = object.get_mut("commands").and_then(serde_json::Value::as_array_mut) {
            for child in sub {
                strip_nohash(child);
            }
        }
    }
}

impl JobSpec {
    /// Parses a job spec from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON or unknown keys.
    pub fn from_json(text: &str) -> hdist_common::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> JobSpec {
        JobSpec::from_json(
            r#"{
                "import": [
                    {"ref": "BASH", "id": "virtual:bash"},
                    {"id": "zlib/2d4kh7hw4uvml67q7npltyaau5xmn4pc"}
                ],
                "commands": [
                    {"chdir": "src"},
                    {"prepend_path": "FOOPATH", "value": "$ARTIFACT/bin"},
                    {"set": "INCLUDE_FROB", "value": "0"},
                    {"cmd": ["pkg-config", "--cflags", "foo"], "to_var": "CFLAGS"},
                    {"cmd": ["bash", "$in0"],
                     "inputs": [{"text": ["make", "make install"]}]}
                ]
            }"#,
        )
        .expect("sample spec parses")
    }

    #[test]
    fn parses_the_documented_example() {
        let spec = sample_spec();
        assert_eq!(spec.import.len(), 2);
        assert_eq!(spec.import[0].r#ref.as_deref(), Some("BASH"));
        assert!(spec.import[0].id.is_virtual());
        assert_eq!(spec.import[1].r#ref, None);
        assert_eq!(spec.commands.as_ref().map(Vec::len), Some(5));
    }

    #[test]
    fn unknown_keys_are_rejected_at_parse() {
        assert!(JobSpec::from_json(r#"{"comands": []}"#).is_err());
    }

    #[test]
    fn kind_of_single_key_nodes() {
        let spec = sample_spec();
        let commands = spec.commands.expect("commands");
        assert_eq!(commands[0].kind().expect("kind"), Some(NodeKind::Chdir));
        assert_eq!(commands[3].kind().expect("kind"), Some(NodeKind::Cmd));
    }

    #[test]
    fn empty_node_is_a_no_op() {
        assert_eq!(CommandNode::default().kind().expect("kind"), None);
    }

    #[test]
    fn modifiers_without_a_kind_are_structural_errors() {
        let node = CommandNode {
            to_var: Some("X".into()),
            ..CommandNode::default()
        };
        assert!(node.kind().is_err());
    }

    #[test]
    fn duplicate_kind_keys_are_structural_errors() {
        let node = CommandNode {
            cmd: Some(vec!["true".into()]),
            set: Some("X".into()),
            ..CommandNode::default()
        };
        let err = node.kind().expect_err("duplicate kinds");
        assert!(err.to_string().contains("several action types"));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let spec = sample_spec();
        let once = canonicalize_job_spec(&spec).expect("canonical");
        let twice = canonicalize_job_spec(&once).expect("canonical again");
        assert_eq!(once, twice);
        assert_eq!(once, spec);
    }

    #[test]
    fn canonicalize_rejects_empty_ref() {
        let spec = JobSpec {
            import: vec![Import {
                id: ArtifactId::new("zlib/abc"),
                r#ref: Some(String::new()),
            }],
            commands: None,
        };
        assert!(canonicalize_job_spec(&spec).is_err());
    }

    #[test]
    fn input_render_requires_exactly_one_field() {
        let both = InputSpec {
            text: Some(vec!["a".into()]),
            string: Some("b".into()),
            json: None,
        };
        assert!(both.render().is_err());
        assert!(InputSpec::default().render().is_err());
    }

    #[test]
    fn input_render_joins_text_lines() {
        let input = InputSpec {
            text: Some(vec!["echo hi".into(), "echo bye".into()]),
            ..InputSpec::default()
        };
        let (payload, json) = input.render().expect("render");
        assert_eq!(payload, "echo hi\necho bye");
        assert!(!json);
    }

    #[test]
    fn input_render_marks_json_payloads() {
        let input = InputSpec {
            json: Some(serde_json::json!({"a": 1})),
            ..InputSpec::default()
        };
        let (payload, json) = input.render().expect("render");
        assert!(payload.contains("\"a\""));
        assert!(json);
    }

    #[test]
    fn spec_hash_is_stable() {
        let a = spec_hash(&sample_spec()).expect("hash");
        let b = spec_hash(&sample_spec()).expect("hash");
        assert_eq!(a, b);
    }

    #[test]
    fn spec_hash_ignores_nohash_value() {
        let mut with = sample_spec();
        if let Some(commands) = with.commands.as_mut() {
            commands[2].nohash_value = Some("anything".into());
        }
        let without = sample_spec();
        assert_eq!(
            spec_hash(&with).expect("hash"),
            spec_hash(&without).expect("hash")
        );
    }

    #[test]
    fn spec_hash_sees_hashed_values() {
        let mut changed = sample_spec();
        if let Some(commands) = changed.commands.as_mut() {
            commands[2].value = Some("1".into());
        }
        assert_ne!(
            spec_hash(&changed).expect("hash"),
            spec_hash(&sample_spec()).expect("hash")
        );
    }

    #[test]
    fn round_trips_through_json() {
        let spec = sample_spec();
        let text = serde_json::to_string(&spec).expect("serialize");
        let back = JobSpec::from_json(&text).expect("reparse");
        assert_eq!(back, spec);
    }
}
