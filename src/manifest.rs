//! The fixed list of resources that must be cached for offline use.

use url::Url;

use crate::error::{CacheError, CacheResult};

/// Ordered, de-duplicated set of resource URLs, resolved against a scope.
#[derive(Debug, Clone)]
pub struct Manifest {
  scope: Url,
  entries: Vec<Url>,
}

impl Manifest {
  /// Resolve every resource against `scope`.
  ///
  /// Entries may be absolute paths (`/index.html`), relative paths
  /// (`index.html`, `./gif.worker.js`) or full URLs. Duplicates after
  /// resolution keep their first position.
  pub fn new<I, S>(scope: Url, resources: I) -> CacheResult<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut entries: Vec<Url> = Vec::new();
    for resource in resources {
      let url = resolve(&scope, resource.as_ref())?;
      if !entries.contains(&url) {
        entries.push(url);
      }
    }

    Ok(Self { scope, entries })
  }

  pub fn scope(&self) -> &Url {
    &self.scope
  }

  pub fn entries(&self) -> &[Url] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Resolve an arbitrary resource the same way manifest entries are resolved.
  pub fn resolve(&self, resource: &str) -> CacheResult<Url> {
    resolve(&self.scope, resource)
  }

  /// Manifest entries with no matching stored key, in manifest order.
  pub fn missing<S: AsRef<str>>(&self, stored: &[S]) -> Vec<Url> {
    self
      .entries
      .iter()
      .filter(|entry| !stored.iter().any(|key| key.as_ref() == entry.as_str()))
      .cloned()
      .collect()
  }
}

fn resolve(scope: &Url, resource: &str) -> CacheResult<Url> {
  let trimmed = resource.trim();
  if trimmed.is_empty() {
    return Err(CacheError::InvalidResource {
      resource: resource.to_string(),
      message: "empty resource".to_string(),
    });
  }

  let url = scope
    .join(trimmed)
    .map_err(|e| CacheError::InvalidResource {
      resource: resource.to_string(),
      message: e.to_string(),
    })?;

  Ok(normalize(url))
}

/// Store key form of a URL: fragments never reach the network, so drop them.
pub fn normalize(mut url: Url) -> Url {
  url.set_fragment(None);
  url
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scope() -> Url {
    Url::parse("http://app.test/").unwrap()
  }

  #[test]
  fn test_entries_resolve_against_scope() {
    let manifest = Manifest::new(
      scope(),
      ["/", "/index.html", "gif.js", "./gif.worker.js", "https://cdn.test/lib.js"],
    )
    .unwrap();

    let entries: Vec<&str> = manifest.entries().iter().map(Url::as_str).collect();
    assert_eq!(
      entries,
      vec![
        "http://app.test/",
        "http://app.test/index.html",
        "http://app.test/gif.js",
        "http://app.test/gif.worker.js",
        "https://cdn.test/lib.js",
      ]
    );
  }

  #[test]
  fn test_duplicates_collapse_to_first() {
    let manifest = Manifest::new(scope(), ["index.html", "/gif.js", "/index.html"]).unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest.entries()[0].as_str(), "http://app.test/index.html");
  }

  #[test]
  fn test_nested_scope() {
    let scope = Url::parse("http://app.test/tools/").unwrap();
    let manifest = Manifest::new(scope, ["index.html", "/favicon.ico"]).unwrap();
    assert_eq!(manifest.entries()[0].as_str(), "http://app.test/tools/index.html");
    assert_eq!(manifest.entries()[1].as_str(), "http://app.test/favicon.ico");
  }

  #[test]
  fn test_fragment_is_dropped() {
    let manifest = Manifest::new(scope(), ["index.html#top"]).unwrap();
    assert_eq!(manifest.entries()[0].as_str(), "http://app.test/index.html");
  }

  #[test]
  fn test_empty_entry_is_rejected() {
    let result = Manifest::new(scope(), ["index.html", "  "]);
    assert!(matches!(result, Err(CacheError::InvalidResource { .. })));
  }

  #[test]
  fn test_missing_preserves_manifest_order() {
    let manifest = Manifest::new(scope(), ["a", "b", "c", "d"]).unwrap();
    let stored = vec!["http://app.test/c".to_string(), "http://app.test/a".to_string()];

    let missing: Vec<String> = manifest
      .missing(&stored[..])
      .into_iter()
      .map(String::from)
      .collect();
    assert_eq!(missing, vec!["http://app.test/b", "http://app.test/d"]);
  }

  #[test]
  fn test_nothing_missing_when_store_is_a_superset() {
    let manifest = Manifest::new(scope(), ["a", "b"]).unwrap();
    let stored = ["http://app.test/b", "http://app.test/extra", "http://app.test/a"];
    assert!(manifest.missing(&stored[..]).is_empty());
  }
}
