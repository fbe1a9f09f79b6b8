use std::collections::HashSet;

/// Build output paths known when the worker is constructed.
///
/// Entries keep their first-seen order and always start with `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    paths: Vec<String>,
    lookup: HashSet<String>,
}

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manifest = Self::default();
        for path in paths {
            let path = normalize(path.as_ref());
            if path.is_empty() || manifest.lookup.contains(&path) {
                continue;
            }
            manifest.lookup.insert(path.clone());
            manifest.paths.push(path);
        }
        manifest
    }

    /// Exact path membership, no prefix or pattern matching
    pub fn contains(&self, path: &str) -> bool {
        self.lookup.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn normalize(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
