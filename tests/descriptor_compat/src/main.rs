fn main() {
    println!("Run `cargo test -p descriptor-compat` to execute descriptor compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use bytemover_handle::{Handle, HandleDescriptor, read_fully};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON values.
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
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    fn read_all(handle: &mut dyn Handle) -> Vec<u8> {
        let estimate = handle.open_for_read().unwrap();
        let mut out = vec![0u8; estimate as usize + 16];
        let n = read_fully(handle, &mut out).unwrap();
        handle.close().unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn fixture_memory() {
        let desc: HandleDescriptor = roundtrip_test("memory.json");
        assert_eq!(desc.kind_name(), "memory");
        let mut handle = desc.open_leaf().unwrap();
        assert_eq!(read_all(handle.as_mut()), b"hello");
    }

    #[test]
    fn fixture_file() {
        let desc: HandleDescriptor = roundtrip_test("file.json");
        assert_eq!(desc.kind_name(), "file");
    }

    #[test]
    fn fixture_file_range() {
        let desc: HandleDescriptor = roundtrip_test("file_range.json");
        let HandleDescriptor::FileRange { ranges, .. } = &desc else {
            panic!("expected a file range, got {desc:?}");
        };
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].end(), 9216);
    }

    #[test]
    fn fixture_composite() {
        let desc: HandleDescriptor = roundtrip_test("composite.json");
        let mut handle = bytemover_multi::reanimate(desc).unwrap();
        assert_eq!(read_all(handle.as_mut()), b"abcdefgh");
    }

    #[test]
    fn fixture_composite_with_lengths() {
        let desc: HandleDescriptor = roundtrip_test("composite_with_lengths.json");
        let handle = bytemover_multi::reanimate(desc.clone()).unwrap();
        assert_eq!(handle.to_remote().unwrap(), desc);
    }

    #[test]
    fn every_fixture_tag_matches_kind_name() {
        for entry in fs::read_dir(fixtures_dir()).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let value = load_fixture(&name);
            let desc: HandleDescriptor = serde_json::from_value(value.clone()).unwrap();
            assert_eq!(value["kind"], desc.kind_name(), "{name}");
        }
    }
}
