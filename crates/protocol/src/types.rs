use serde::{Deserialize, Serialize};

/// Builds the server-side key of chunk `index` of the file hashed as `file_hash`.
pub fn chunk_key(file_hash: &str, index: usize) -> String {
    format!("{file_hash}-{index}")
}

/// One entry of a verify response's `uploadedList`.
///
/// Servers report already-stored chunks either by chunk key or by index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkRef {
    Index(u64),
    Key(String),
}

impl ChunkRef {
    /// Resolves the entry to a chunk index of the file `file_hash` split into
    /// `chunk_count` chunks.
    ///
    /// Returns `None` for keys of another file, malformed keys, or indices
    /// out of range.
    pub fn resolve(&self, file_hash: &str, chunk_count: usize) -> Option<usize> {
        let index = match self {
            ChunkRef::Index(i) => usize::try_from(*i).ok()?,
            ChunkRef::Key(key) => {
                let suffix = key.strip_prefix(file_hash)?.strip_prefix('-')?;
                if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                suffix.parse::<usize>().ok()?
            }
        };
        (index < chunk_count).then_some(index)
    }
}

impl From<usize> for ChunkRef {
    fn from(index: usize) -> Self {
        ChunkRef::Index(index as u64)
    }
}

impl From<String> for ChunkRef {
    fn from(key: String) -> Self {
        ChunkRef::Key(key)
    }
}

impl From<&str> for ChunkRef {
    fn from(key: &str) -> Self {
        ChunkRef::Key(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_format() {
        assert_eq!(chunk_key("abc123", 0), "abc123-0");
        assert_eq!(chunk_key("abc123", 17), "abc123-17");
    }

    #[test]
    fn chunk_ref_deserializes_mixed_list() {
        let refs: Vec<ChunkRef> = serde_json::from_str(r#"["f00d-1", 2, "f00d-3"]"#).unwrap();
        assert_eq!(
            refs,
            vec![
                ChunkRef::Key("f00d-1".into()),
                ChunkRef::Index(2),
                ChunkRef::Key("f00d-3".into()),
            ]
        );
    }

    #[test]
    fn resolve_key_of_same_file() {
        let r = ChunkRef::from("f00d-4");
        assert_eq!(r.resolve("f00d", 5), Some(4));
    }

    #[test]
    fn resolve_rejects_other_file() {
        let r = ChunkRef::from("beef-1");
        assert_eq!(r.resolve("f00d", 5), None);
    }

    #[test]
    fn resolve_rejects_hash_prefix_collision() {
        // "f00d1-2" must not be read as chunk "1-2" of "f00d".
        let r = ChunkRef::from("f00d1-2");
        assert_eq!(r.resolve("f00d", 5), None);
    }

    #[test]
    fn resolve_rejects_out_of_range() {
        assert_eq!(ChunkRef::Index(5).resolve("f00d", 5), None);
        assert_eq!(ChunkRef::from("f00d-9").resolve("f00d", 5), None);
    }

    #[test]
    fn resolve_rejects_malformed_suffix() {
        assert_eq!(ChunkRef::from("f00d-x").resolve("f00d", 5), None);
        assert_eq!(ChunkRef::from("f00d").resolve("f00d", 5), None);
        assert_eq!(ChunkRef::from("f00d-").resolve("f00d", 5), None);
    }

    #[test]
    fn resolve_rejects_signed_suffix() {
        assert_eq!(ChunkRef::from("f00d-+4").resolve("f00d", 5), None);
        assert_eq!(ChunkRef::from("f00d--1").resolve("f00d", 5), None);
        assert_eq!(ChunkRef::from("f00d- 4").resolve("f00d", 5), None);
    }

    #[test]
    fn resolve_accepts_keys_built_by_chunk_key() {
        for index in [0, 3, 4] {
            let key = chunk_key("f00d", index);
            assert_eq!(ChunkRef::from(key).resolve("f00d", 5), Some(index));
        }
    }
}
