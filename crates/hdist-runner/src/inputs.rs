//! Materialization of inline input payloads.
//!
//! A `cmd`/`hit` node's `inputs` are written to files in the scratch dir
//! named after the node's position, and exposed to that node only as
//! `$in0`, `$in1`, …. The files are deliberately not cleaned up before
//! the scratch dir itself goes away — they are useful for post-mortems.

use std::path::Path;

use hdist_core::jobspec::InputSpec;

use crate::error::{JobError, Result};

/// Writes each input to `<pos joined with _>_in<k>[.json]` and returns
/// the `in<k>` → absolute-path bindings for the node's local env.
pub(crate) fn dump_inputs(
    scratch: &Path,
    inputs: &[InputSpec],
    pos: &[usize],
) -> Result<Vec<(String, String)>> {
    let prefix = pos
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("_");

    let mut bindings = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let name = format!("in{index}");
        let (payload, is_json) = input.render()?;
        let mut file_name = format!("{prefix}_{name}");
        if is_json {
            file_name.push_str(".json");
        }
        let path = scratch.join(file_name);
        std::fs::write(&path, payload).map_err(|e| JobError::Io {
            path: path.clone(),
            source: e,
        })?;
        bindings.push((name, path.display().to_string()));
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_files_after_the_node_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inputs = vec![
            InputSpec {
                text: Some(vec!["make".into(), "make install".into()]),
                ..InputSpec::default()
            },
            InputSpec {
                string: Some("raw".into()),
                ..InputSpec::default()
            },
        ];
        let bindings = dump_inputs(dir.path(), &inputs, &[1, 3]).expect("dump");
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].0, "in0");
        assert!(bindings[0].1.ends_with("1_3_in0"));
        assert_eq!(
            std::fs::read_to_string(&bindings[0].1).expect("read"),
            "make\nmake install"
        );
        assert_eq!(std::fs::read_to_string(&bindings[1].1).expect("read"), "raw");
    }

    #[test]
    fn json_inputs_gain_a_json_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inputs = vec![InputSpec {
            json: Some(serde_json::json!({"k": [1, 2]})),
            ..InputSpec::default()
        }];
        let bindings = dump_inputs(dir.path(), &inputs, &[0]).expect("dump");
        assert!(bindings[0].1.ends_with("0_in0.json"));
        let text = std::fs::read_to_string(&bindings[0].1).expect("read");
        assert!(text.contains("\"k\""));
    }

    #[test]
    fn bad_entries_are_structural_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inputs = vec![InputSpec::default()];
        assert!(dump_inputs(dir.path(), &inputs, &[0]).is_err());
    }
}
