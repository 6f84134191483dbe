//! Profile documents and their leaves-first merge semantics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use petgraph::graph::NodeIndex;
use serde::Deserialize;

use crate::error::{ProfileError, Result};
use crate::graph::InheritanceGraph;
use crate::source::SourceCache;

/// The parsed fields of a profile document.
///
/// Other document sections are allowed and ignored here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileDoc {
    /// Base profiles this one inherits from.
    #[serde(default)]
    pub extends: Vec<IncludeDoc>,

    /// Parameter map contributed by this profile.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,

    /// Package entries contributed by this profile.
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
}

/// One include record inside `extends`.
///
/// Either `dir` points at a local directory, or `urls` + `key` name a
/// tree to fetch through the source cache.
#[derive(Debug, Clone, Deserialize)]
pub struct IncludeDoc {
    /// Profile file, relative to the include's base directory.
    pub profile: String,

    /// Local base directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Source URLs (exactly one) for a fetched base.
    #[serde(default)]
    pub urls: Option<Vec<String>>,

    /// Source-cache key for a fetched base.
    #[serde(default)]
    pub key: Option<String>,
}

/// One entry of a profile's `packages` list: either `name[/variant]`, or
/// a single-key map renaming the package within the profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PackageEntry {
    /// `name` or `name/variant`.
    Plain(String),
    /// `{local_name: "name/variant"}`.
    Renamed(BTreeMap<String, String>),
}

/// A resolved package selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// The package name.
    pub name: String,
    /// The variant, if one was selected.
    pub variant: Option<String>,
}

/// A loaded profile with its (already loaded) bases.
#[derive(Debug)]
pub struct Profile {
    basedir: PathBuf,
    doc_name: String,
    doc: ProfileDoc,
    extends: Vec<Profile>,
    /// Checkout dir for fetched bases; removed when the profile drops.
    #[allow(dead_code)]
    checkout: Option<tempfile::TempDir>,
}

impl Profile {
    /// Returns the profile's base directory.
    #[must_use]
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// Returns the profile file name relative to the base directory.
    #[must_use]
    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    /// Returns the loaded base profiles.
    #[must_use]
    pub fn extends(&self) -> &[Profile] {
        &self.extends
    }

    /// Merges parameters leaves-first.
    ///
    /// Two bases contributing the same key conflict; this profile's own
    /// parameters override whatever the bases produced.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::ConflictingProfiles`] on overlapping base
    /// keys.
    pub fn parameters(&self) -> Result<BTreeMap<String, serde_yaml::Value>> {
        let mut parameters = BTreeMap::new();
        for base in &self.extends {
            for (key, value) in base.parameters()? {
                if parameters.contains_key(&key) {
                    return Err(ProfileError::ConflictingProfiles(format!(
                        "two base profiles set the same parameter {key}"
                    )));
                }
                let _ = parameters.insert(key, value);
            }
        }
        parameters.extend(self.doc.parameters.clone());
        Ok(parameters)
    }

    /// Resolves the package map, including base contributions.
    ///
    /// The key is the package's local name within the profile. The
    /// sentinel variant `skip` removes an entry a base contributed.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::ConflictingProfiles`] when two bases
    /// contribute the same local name, and
    /// [`ProfileError::InvalidProfile`] for malformed entries.
    pub fn packages(&self) -> Result<BTreeMap<String, PackageSpec>> {
        let mut packages = BTreeMap::new();
        for base in &self.extends {
            for (key, value) in base.packages()? {
                if packages.contains_key(&key) {
                    return Err(ProfileError::ConflictingProfiles(format!(
                        "package {key} found in two different base profiles"
                    )));
                }
                let _ = packages.insert(key, value);
            }
        }

        for entry in &self.doc.packages {
            let (local_name, selector) = match entry {
                PackageEntry::Plain(selector) => (None, selector.as_str()),
                PackageEntry::Renamed(map) => {
                    let mut pairs = map.iter();
                    match (pairs.next(), pairs.next()) {
                        (Some((local, selector)), None) => {
                            (Some(local.as_str()), selector.as_str())
                        }
                        _ => {
                            return Err(ProfileError::InvalidProfile(
                                "each package specification map should have a single key only"
                                    .to_owned(),
                            ));
                        }
                    }
                }
            };
            let (name, variant) = parse_package_selector(selector)?;
            let local_name = local_name.unwrap_or(&name).to_owned();

            if variant.as_deref() == Some("skip") {
                let _ = packages.remove(&local_name);
                continue;
            }
            let _ = packages.insert(local_name, PackageSpec { name, variant });
        }
        Ok(packages)
    }

    /// Finds a file in this profile or exactly one of its bases.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::ConflictingProfiles`] if two different
    /// bases supply the file.
    pub fn find_file(&self, relname: &str) -> Result<Option<PathBuf>> {
        let own = self.basedir.join(relname);
        if own.exists() {
            return Ok(Some(own));
        }
        let mut found = None;
        for base in &self.extends {
            if let Some(path) = base.find_file(relname)? {
                if found.is_some() {
                    return Err(ProfileError::ConflictingProfiles(format!(
                        "file {relname} found in two different base profiles"
                    )));
                }
                found = Some(path);
            }
        }
        Ok(found)
    }
}

fn parse_package_selector(selector: &str) -> Result<(String, Option<String>)> {
    let parts: Vec<&str> = selector.split('/').collect();
    match parts.as_slice() {
        [name] => Ok(((*name).to_owned(), None)),
        [name, variant] => Ok(((*name).to_owned(), Some((*variant).to_owned()))),
        _ => Err(ProfileError::InvalidProfile(format!(
            "too many slashes in package name: {selector}"
        ))),
    }
}

/// Loads a profile and, recursively, every base it extends.
///
/// Remote bases are fetched and unpacked through the source cache into
/// checkout directories owned by the returned profile tree.
///
/// # Errors
///
/// Returns an error for unreadable or malformed documents, failed
/// fetches, or inheritance that is not a tree (diamonds and cycles).
pub fn load_profile(cache: &dyn SourceCache, include: &IncludeDoc) -> Result<Profile> {
    let mut graph = InheritanceGraph::new();
    load_recursive(cache, include, &mut graph, None)
}

fn load_recursive(
    cache: &dyn SourceCache,
    include: &IncludeDoc,
    graph: &mut InheritanceGraph,
    parent: Option<NodeIndex>,
) -> Result<Profile> {
    let (basedir, checkout) = match (&include.dir, &include.urls, &include.key) {
        (Some(dir), None, None) => {
            if !dir.is_absolute() {
                return Err(ProfileError::InvalidProfile(format!(
                    "include dir must be absolute: {}",
                    dir.display()
                )));
            }
            (dir.clone(), None)
        }
        (None, Some(urls), Some(key)) => {
            let [url] = urls.as_slice() else {
                return Err(ProfileError::InvalidProfile(
                    "a fetched include needs exactly one url".to_owned(),
                ));
            };
            let checkout = tempfile::tempdir().map_err(|e| ProfileError::Io {
                path: std::env::temp_dir(),
                source: e,
            })?;
            cache.fetch(url, key)?;
            cache.unpack(key, checkout.path())?;
            (checkout.path().to_owned(), Some(checkout))
        }
        _ => {
            return Err(ProfileError::InvalidProfile(
                "include needs either 'dir' or 'urls' plus 'key'".to_owned(),
            ));
        }
    };

    // A fetched tree is identified by its key, a local one by its dir;
    // either way the same profile reached twice is a diamond.
    let identity = match &include.key {
        Some(key) => format!("{key}|{}", include.profile),
        None => format!("{}|{}", basedir.display(), include.profile),
    };
    let node = graph.add_profile(&identity, &include.profile, parent)?;

    let doc_path = basedir.join(&include.profile);
    let text = std::fs::read_to_string(&doc_path).map_err(|e| ProfileError::Io {
        path: doc_path,
        source: e,
    })?;
    let mut doc: ProfileDoc = serde_yaml::from_str(&text)?;

    let includes = std::mem::take(&mut doc.extends);
    let mut extends = Vec::with_capacity(includes.len());
    for parent_include in &includes {
        extends.push(load_recursive(cache, parent_include, graph, Some(node))?);
    }

    Ok(Profile {
        basedir,
        doc_name: include.profile.clone(),
        doc,
        extends,
        checkout,
    })
}
