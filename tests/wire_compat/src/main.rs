fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkup_protocol::{ChunkRef, MergeRequest, VerifyRequest, VerifyResponse};

    const FILE_HASH: &str = "9e107d9d372bb6826bd81d3542a419d6";

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (object key order is ignored).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  server: {fixture}\n  client: {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_verify_request() {
        let req: VerifyRequest = roundtrip_test("verify_request.json");
        assert_eq!(req.filename, "holiday.mp4");
        assert_eq!(req.file_hash, FILE_HASH);
    }

    #[test]
    fn fixture_verify_response_with_keys() {
        let resp: VerifyResponse = roundtrip_test("verify_response_keys.json");
        assert!(resp.should_upload);
        let indices: Vec<_> = resp
            .uploaded_list
            .iter()
            .map(|r| r.resolve(FILE_HASH, 3))
            .collect();
        assert_eq!(indices, vec![Some(0), Some(2)]);
    }

    #[test]
    fn fixture_verify_response_with_indices() {
        let resp: VerifyResponse = roundtrip_test("verify_response_indices.json");
        assert_eq!(
            resp.uploaded_list,
            vec![ChunkRef::Index(0), ChunkRef::Index(2)]
        );
    }

    #[test]
    fn fixture_verify_response_deduplicated() {
        let resp: VerifyResponse = roundtrip_test("verify_response_deduplicated.json");
        assert_eq!(resp, VerifyResponse::deduplicated());
    }

    #[test]
    fn fixture_merge_request() {
        let req: MergeRequest = roundtrip_test("merge_request.json");
        assert_eq!(req.size, 10 * 1024 * 1024);
        assert_eq!(req.file_hash, FILE_HASH);
    }

    #[test]
    fn empty_uploaded_list_is_accepted() {
        let resp: VerifyResponse =
            serde_json::from_str(r#"{"shouldUpload":true,"uploadedList":[]}"#).unwrap();
        assert_eq!(resp, VerifyResponse::upload(Vec::new()));
    }

    #[test]
    fn all_fixtures_are_covered() {
        let covered = [
            "merge_request.json",
            "verify_request.json",
            "verify_response_deduplicated.json",
            "verify_response_indices.json",
            "verify_response_keys.json",
        ];
        let mut found: Vec<String> = fs::read_dir(fixtures_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".json"))
            .collect();
        found.sort();
        assert_eq!(found, covered);
    }
}
