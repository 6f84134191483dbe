//! Import resolution.
//!
//! Turns the spec's ordered `import` list into the initial environment
//! (`<REF>_DIR`/`<REF>_ID` bindings plus `HDIST_IMPORT` and
//! `HDIST_IMPORT_PATHS`) and prepends the synthetic `ARTIFACT` node to
//! the command list.

use std::path::Path;

use hdist_common::constants::PATH_LIST_SEPARATOR;
use hdist_core::env::{Env, Virtuals};
use hdist_core::jobspec::{CommandNode, JobSpec};
use hdist_core::store::ArtifactStore;

use crate::error::{JobError, Result};

pub(crate) fn resolve_imports(
    spec: &JobSpec,
    store: &dyn ArtifactStore,
    artifact_dir: &Path,
    virtuals: &Virtuals,
) -> Result<(Env, Vec<CommandNode>)> {
    let mut env = Env::new();
    let mut ids = Vec::with_capacity(spec.import.len());
    let mut paths = Vec::with_capacity(spec.import.len());

    for import in &spec.import {
        let mut id = import.id.clone();
        // Resolutions of virtual imports are provided by the caller at
        // run time; the hashable spec keeps the virtual id.
        if id.is_virtual() {
            id = virtuals
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| JobError::MissingVirtual(id.clone()))?;
        }
        let dir = store
            .resolve(&id)
            .ok_or_else(|| JobError::UnbuiltDependency {
                reference: import.r#ref.clone(),
                id: id.clone(),
            })?;
        tracing::debug!(id = %id, dir = %dir.display(), "resolved import");

        ids.push(id.as_str().to_owned());
        paths.push(dir.display().to_string());
        if let Some(reference) = &import.r#ref {
            let _ = env.insert(format!("{reference}_DIR"), dir.display().to_string());
            let _ = env.insert(format!("{reference}_ID"), id.as_str().to_owned());
        }
    }

    let mut commands =
        vec![CommandNode::set_var("ARTIFACT", artifact_dir.display().to_string())];
    commands.extend(spec.commands.clone().unwrap_or_default());

    let _ = env.insert("HDIST_IMPORT".to_owned(), ids.join(" "));
    let _ = env.insert(
        "HDIST_IMPORT_PATHS".to_owned(),
        paths.join(PATH_LIST_SEPARATOR),
    );
    Ok((env, commands))
}
