//! Ordered environment maps and the `HDIST_VIRTUALS` encoding.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use hdist_common::types::ArtifactId;

/// Environment presented to a scope or a child process.
///
/// Insertion-ordered so the environment a child inherits is deterministic
/// for a given spec and import list.
pub type Env = IndexMap<String, String>;

/// Mapping from `virtual:` ids to the real artifact ids the caller
/// supplies for this run.
pub type Virtuals = BTreeMap<String, ArtifactId>;

/// Packs a virtuals mapping into the `HDIST_VIRTUALS` form:
/// `k1=v1;k2=v2`, entries sorted by key.
#[must_use]
pub fn pack_virtuals(virtuals: &Virtuals) -> String {
    virtuals
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Unpacks an `HDIST_VIRTUALS` value back into a mapping.
///
/// Splitting happens on `;` and then on the *first* `=`, so values may
/// themselves contain `=`. Malformed entries are skipped.
#[must_use]
pub fn unpack_virtuals(packed: &str) -> Virtuals {
    packed
        .split(';')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_owned(), ArtifactId::new(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Virtuals {
        let mut v = Virtuals::new();
        let _ = v.insert(
            "virtual:unix".into(),
            ArtifactId::new("unix/2d4kh7hw4uvml67q7npltyaau5xmn4pc"),
        );
        let _ = v.insert("virtual:bash".into(), ArtifactId::new("bash/abcdef"));
        v
    }

    #[test]
    fn pack_sorts_by_key() {
        assert_eq!(
            pack_virtuals(&sample()),
            "virtual:bash=bash/abcdef;virtual:unix=unix/2d4kh7hw4uvml67q7npltyaau5xmn4pc"
        );
    }

    #[test]
    fn pack_unpack_round_trips() {
        let v = sample();
        assert_eq!(unpack_virtuals(&pack_virtuals(&v)), v);
    }

    #[test]
    fn unpack_empty_is_empty() {
        assert!(unpack_virtuals("").is_empty());
    }

    #[test]
    fn unpack_splits_on_first_equals_only() {
        let v = unpack_virtuals("virtual:x=id=with=equals");
        assert_eq!(
            v.get("virtual:x").map(ArtifactId::as_str),
            Some("id=with=equals")
        );
    }

    #[test]
    fn repeated_pack_unpack_is_identity() {
        let v = sample();
        let once = unpack_virtuals(&pack_virtuals(&v));
        let twice = unpack_virtuals(&pack_virtuals(&once));
        assert_eq!(once, twice);
    }
}
