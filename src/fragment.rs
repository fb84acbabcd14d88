//! Fragment composer: turns a manifest's `include`/`first`/`last` keys plus
//! a directory filter into three ordered, deduplicated file-path lists.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{PgMakeSchemasError, Result};

/// Either a single string or a list of strings in YAML — `include`,
/// `first`, and `last` all accept this shape.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    #[default]
    None_,
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::None_ => vec![],
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v,
        }
    }
}

/// Resolves a `$NAME`/`${NAME}` include-reference prefix against
/// `include_ref_map`; strings without that prefix pass through unchanged.
pub fn resolve_include_ref(include: &str, include_ref_map: &HashMap<String, PathBuf>) -> Result<String> {
    let re = Regex::new(r"^(?:\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_]+))(.*)$").unwrap();

    let Some(caps) = re.captures(include) else {
        return Ok(include.to_string());
    };

    let ref_name = caps.get(1).or_else(|| caps.get(2)).unwrap().as_str();
    let rest = caps.get(3).map(|m| m.as_str()).unwrap_or("");

    let ref_value = include_ref_map
        .get(ref_name)
        .ok_or_else(|| PgMakeSchemasError::manifest(include, format!("undefined include-reference {ref_name:?}")))?;

    Ok(format!("{}{}", ref_value.display(), rest))
}

#[derive(Debug)]
pub struct FragmentLists {
    pub first: Vec<PathBuf>,
    pub regular: Vec<PathBuf>,
    pub last: Vec<PathBuf>,
}

/// Resolves `include` into a search-path list (each entry then the
/// directory itself), filters each search path's direct entries, and
/// assembles `first`/`regular`/`last` in that order, erroring on duplicates.
pub fn compose_fragments(
    base_dir: &Path,
    include: &[String],
    first: &[String],
    last: &[String],
    include_ref_map: &HashMap<String, PathBuf>,
    filter: impl Fn(&Path) -> bool,
) -> Result<FragmentLists> {
    // Step 1: search_paths = resolved includes ++ [base_dir], base_dir last.
    let mut search_paths = Vec::with_capacity(include.len() + 1);
    for inc in include {
        let resolved = resolve_include_ref(inc, include_ref_map)?;
        let path = base_dir.join(resolved);
        let canon = canonicalize_lenient(&path);
        search_paths.push(canon);
    }
    search_paths.push(canonicalize_lenient(base_dir));

    // Step 2: scan each search path, lexicographic order, dedup.
    let mut regular = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for search_path in &search_paths {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(search_path)
            .map_err(|source| PgMakeSchemasError::Io { path: search_path.clone(), source })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for entry in entries {
            let canon = canonicalize_lenient(&entry);
            if !filter(&canon) {
                continue;
            }

            if !seen.insert(canon.clone()) {
                return Err(PgMakeSchemasError::ordering(format!("{}: this file is duplicated", canon.display())));
            }

            regular.push(canon);
        }
    }

    // Step 3: pull first/last entries out of `regular` by name, in order.
    let extract = |names: &[String], regular: &mut Vec<PathBuf>| -> Result<Vec<PathBuf>> {
        let mut extracted = Vec::with_capacity(names.len());

        for name in names {
            let mut found = None;

            for search_path in &search_paths {
                let candidate = canonicalize_lenient(&search_path.join(name));
                if let Some(pos) = regular.iter().position(|p| p == &candidate) {
                    found = Some(pos);
                    break;
                }
            }

            match found {
                Some(pos) => extracted.push(regular.remove(pos)),
                None => return Err(PgMakeSchemasError::ordering(format!("{name:?}: this file is not used"))),
            }
        }

        Ok(extracted)
    };

    let first_list = extract(first, &mut regular)?;
    let last_list = extract(last, &mut regular)?;

    Ok(FragmentLists { first: first_list, regular, last: last_list })
}

/// `Path::canonicalize` that falls back to a lexical join when the path
/// doesn't exist yet (e.g. a `first`/`last` entry being probed before we
/// know it's a real file) — mirrors Python's `os.path.realpath`, which
/// never errors on a missing path.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sql_filter(p: &Path) -> bool {
        p.extension().map(|e| e == "sql").unwrap_or(false)
    }

    #[test]
    fn orders_first_regular_last() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.sql", "b.sql", "c.sql"] {
            fs::write(dir.path().join(name), "-- x").unwrap();
        }

        let lists = compose_fragments(
            dir.path(),
            &[],
            &["b.sql".to_string()],
            &["a.sql".to_string()],
            &HashMap::new(),
            sql_filter,
        )
        .unwrap();

        assert_eq!(lists.first, vec![dir.path().join("b.sql").canonicalize().unwrap()]);
        assert_eq!(lists.regular, vec![dir.path().join("c.sql").canonicalize().unwrap()]);
        assert_eq!(lists.last, vec![dir.path().join("a.sql").canonicalize().unwrap()]);
    }

    #[test]
    fn plain_scan_without_first_or_last_is_lexicographic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.sql", "a.sql", "b.sql"] {
            fs::write(dir.path().join(name), "-- x").unwrap();
        }

        let lists = compose_fragments(dir.path(), &[], &[], &[], &HashMap::new(), sql_filter).unwrap();

        let names: Vec<_> =
            lists.regular.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["a.sql", "b.sql", "c.sql"]);
    }

    #[test]
    fn unused_first_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.sql"), "-- x").unwrap();

        let err = compose_fragments(
            dir.path(),
            &[],
            &["missing.sql".to_string()],
            &[],
            &HashMap::new(),
            sql_filter,
        )
        .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Ordering);
    }

    #[test]
    fn duplicate_across_include_and_base_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("inc");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("shared.sql"), "-- 1").unwrap();
        fs::write(dir.path().join("shared.sql"), "-- 1").unwrap();

        // base_dir joined with include "." resolves to itself, so make the
        // include point at `sub`, then symlink to force the same canonical
        // file to be scanned twice via two include entries.
        let err = compose_fragments(
            dir.path(),
            &["inc".to_string(), "inc".to_string()],
            &[],
            &[],
            &HashMap::new(),
            sql_filter,
        )
        .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Ordering);
    }

    #[test]
    fn resolves_dollar_name_reference() {
        let mut map = HashMap::new();
        map.insert("SHARED".to_string(), PathBuf::from("/shared/sql"));

        assert_eq!(resolve_include_ref("$SHARED/extra", &map).unwrap(), "/shared/sql/extra");
        assert_eq!(resolve_include_ref("${SHARED}/extra", &map).unwrap(), "/shared/sql/extra");
        assert_eq!(resolve_include_ref("plain/path", &map).unwrap(), "plain/path");
    }

    #[test]
    fn undefined_reference_fails() {
        let err = resolve_include_ref("$MISSING/x", &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Manifest);
    }
}
