//! Per-parent child-id manifests.
//!
//! Wire format: comma-separated tokens, each a bare id or an inclusive
//! `start:end` range, e.g. `1,4:7,12`. Manifests are sets: decoding sorts and
//! deduplicates, encoding always emits the most compact range form.

use super::error::{Error, Result};
use std::path::Path;

/// Most ids a single manifest may expand to.
pub const MAX_IDS: u64 = 10_000_000;

/// Encode a set of ids into range notation.
pub fn encode(ids: &[i64]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut tokens = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while end.checked_add(1).is_some_and(|next| iter.peek() == Some(&next)) {
            end += 1;
            iter.next();
        }
        if end == start {
            tokens.push(start.to_string());
        } else {
            tokens.push(format!("{}:{}", start, end));
        }
    }
    tokens.join(",")
}

/// Decode range notation. `origin` is only used for error messages.
pub fn decode(text: &str, origin: &Path) -> Result<Vec<i64>> {
    let bad = |token: &str| Error::Manifest {
        path: origin.to_path_buf(),
        token: token.to_string(),
    };

    let mut ids = Vec::new();
    for token in text.trim().split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        match token.split_once(':') {
            Some((a, b)) => {
                let start: i64 = a.trim().parse().map_err(|_| bad(token))?;
                let end: i64 = b.trim().parse().map_err(|_| bad(token))?;
                let total = end
                    .checked_sub(start)
                    .and_then(|span| u64::try_from(span).ok())
                    .and_then(|span| span.checked_add(1 + ids.len() as u64));
                if !total.is_some_and(|n| n <= MAX_IDS) {
                    return Err(bad(token));
                }
                ids.extend(start..=end);
            }
            None => ids.push(token.parse().map_err(|_| bad(token))?),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Read a manifest. A missing file is an empty set.
pub fn load(path: &Path) -> Result<Vec<i64>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    decode(&text, path)
}

/// Write a manifest atomically (temp file, then rename).
pub fn save(path: &Path, ids: &[i64]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let tmp_path = path.with_extension("csv.tmp");
    std::fs::write(&tmp_path, encode(ids)).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Append ids to a manifest, keeping it a set.
pub fn append(path: &Path, new_ids: &[i64]) -> Result<Vec<i64>> {
    let mut ids = load(path)?;
    ids.extend_from_slice(new_ids);
    ids.sort_unstable();
    ids.dedup();
    save(path, &ids)?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn origin() -> PathBuf {
        PathBuf::from("test.csv")
    }

    #[test]
    fn test_manifest_encode_ranges() {
        assert_eq!(encode(&[1, 2, 3, 5, 7, 8]), "1:3,5,7:8");
        assert_eq!(encode(&[9]), "9");
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_manifest_encode_unsorted_with_duplicates() {
        assert_eq!(encode(&[4, 2, 3, 3, 10]), "2:4,10");
    }

    #[test]
    fn test_manifest_decode_mixed() {
        assert_eq!(decode("1:3,5, 7:8\n", &origin()).unwrap(), vec![1, 2, 3, 5, 7, 8]);
        assert_eq!(decode("", &origin()).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn test_manifest_decode_rejects_garbage() {
        assert!(matches!(
            decode("1,x", &origin()),
            Err(Error::Manifest { token, .. }) if token == "x"
        ));
        assert!(decode("5:3", &origin()).is_err());
        assert!(decode("1:2:3", &origin()).is_err());
    }

    #[test]
    fn test_manifest_decode_rejects_oversized_ranges() {
        assert!(matches!(
            decode("1:9223372036854775806", &origin()),
            Err(Error::Manifest { .. })
        ));
        assert!(decode("-9223372036854775808:9223372036854775807", &origin()).is_err());
        assert!(decode(&format!("0:{}", MAX_IDS), &origin()).is_err());
        let combined = format!("1:3,10:{}", MAX_IDS + 7);
        assert!(decode(&combined, &origin()).is_err());
        assert_eq!(decode("7:7", &origin()).unwrap(), vec![7]);
    }

    #[test]
    fn test_manifest_encode_at_max_id() {
        let ids = [i64::MAX - 2, i64::MAX - 1, i64::MAX];
        let text = encode(&ids);
        assert_eq!(text, format!("{}:{}", i64::MAX - 2, i64::MAX));
        assert_eq!(decode(&text, &origin()).unwrap(), ids.to_vec());
    }

    #[test]
    fn test_manifest_save_load_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monads").join("1").join("simulations.csv");
        assert!(load(&path).unwrap().is_empty());
        save(&path, &[3, 1, 2]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1:3");
        let ids = append(&path, &[4, 9]).unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4, 9]);
        assert_eq!(load(&path).unwrap(), ids);
        assert!(!path.with_extension("csv.tmp").exists());
    }

    proptest! {
        #[test]
        fn prop_manifest_roundtrip(ids in proptest::collection::vec(0i64..500, 0..60)) {
            let mut expected = ids.clone();
            expected.sort_unstable();
            expected.dedup();
            let text = encode(&ids);
            prop_assert_eq!(decode(&text, &origin()).unwrap(), expected);
        }

        #[test]
        fn prop_manifest_encoding_is_canonical(ids in proptest::collection::vec(0i64..200, 0..40)) {
            let once = encode(&ids);
            let twice = encode(&decode(&once, &origin()).unwrap());
            prop_assert_eq!(once, twice);
        }
    }
}
