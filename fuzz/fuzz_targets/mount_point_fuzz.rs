#![no_main]
use boxmount::modules::mountspec::validate_mount_point;
use boxmount::modules::systemd::escape_path;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        if let Ok(path) = validate_mount_point(raw) {
            let text = path.to_string_lossy();
            // Accepted paths are absolute, normalized and stable.
            assert!(text.starts_with('/'));
            assert!(!text.contains("//"));
            assert!(text == "/" || !text.ends_with('/'));
            assert_eq!(validate_mount_point(&path).ok().as_ref(), Some(&path));

            // Unit names never contain a path separator.
            assert!(!escape_path(&path).contains('/'));
        }
    }
});
