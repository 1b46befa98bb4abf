//! Parsing of caller-supplied JSON arguments.

use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Parse a JSON argument into `T`. Any syntax or shape error is reported as
/// [`Error::MalformedInput`] before storage is touched.
pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<T> {
  serde_json::from_str(raw).map_err(Error::MalformedInput)
}

/// Like [`parse`], but an absent or blank argument yields `T::default()`.
pub fn parse_or_default<T: DeserializeOwned + Default>(raw: Option<&str>) -> Result<T> {
  match raw.map(str::trim) {
    None | Some("") => Ok(T::default()),
    Some(raw) => parse(raw),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ErrorKind, item::NewItem, query::ItemFilter};

  #[test]
  fn bad_json_is_malformed_input() {
    let err = parse::<NewItem>("{title: nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
  }

  #[test]
  fn missing_filter_is_default() {
    let f: ItemFilter = parse_or_default(None).unwrap();
    assert_eq!(f, ItemFilter::default());
    let f: ItemFilter = parse_or_default(Some("  ")).unwrap();
    assert_eq!(f, ItemFilter::default());
  }
}
