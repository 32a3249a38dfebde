use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_NANOS: AtomicU64 = AtomicU64::new(0);

/// Wall-clock nanoseconds, strictly increasing across calls in this process.
pub(crate) fn monotonic_nanos() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let mut prev = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_NANOS.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Staging collection id for a new upload.
pub(crate) fn new_upload_id() -> String {
    format!("web-file-upload-{}", monotonic_nanos())
}

/// Session id for a managed upload of `local_path`.
pub(crate) fn new_session_id(local_path: &Path) -> String {
    format!("upload-{}-{}", monotonic_nanos(), base_name(local_path))
}

/// Id for a controller that is not owned by a manager.
pub(crate) fn new_standalone_session_id() -> String {
    format!("session-{}", monotonic_nanos())
}

/// Final path component, lossy.
pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nanos_strictly_increase() {
        let mut prev = monotonic_nanos();
        for _ in 0..1000 {
            let next = monotonic_nanos();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..200)
                        .map(|_| new_session_id(Path::new("/tmp/a.bin")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(id.ends_with("-a.bin"));
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1600);
    }

    #[test]
    fn upload_id_prefix() {
        assert!(new_upload_id().starts_with("web-file-upload-"));
        assert!(new_standalone_session_id().starts_with("session-"));
    }

    #[test]
    fn base_name_of_root_is_empty() {
        assert_eq!(base_name(Path::new("/")), "");
        assert_eq!(base_name(Path::new("dir/file.txt")), "file.txt");
    }
}
