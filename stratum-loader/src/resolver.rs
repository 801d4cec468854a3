//! Unit id to location resolution

/// Normalises and joins unit ids against base locations
pub trait PathResolver {
    /// Resolve `id` against `base`. A base ending in `/` is a directory;
    /// otherwise its last segment is dropped first.
    fn absolute(&self, id: &str, base: &str) -> String;

    /// The directory part of `path`, including the trailing `/`
    fn parent(&self, path: &str) -> String;
}

/// Whether `id` is relative to the unit requesting it
pub fn is_relative(id: &str) -> bool {
    id.starts_with('.')
}

/// Whether `id` names a location on its own
pub fn is_rooted(id: &str) -> bool {
    id.starts_with('/') || id.contains("://")
}

/// URL and path style resolver.
///
/// `.` and `..` segments are applied, the scheme and host of the base are
/// kept, and a trailing `/` on the id survives so directories stay
/// directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlResolver;

impl UrlResolver {
    /// Split `scheme://host` off the front of a location
    fn split_origin(location: &str) -> (&str, &str) {
        match location.find("://") {
            Some(index) => {
                let after = index + 3;
                let end = location[after..]
                    .find('/')
                    .map(|offset| after + offset)
                    .unwrap_or(location.len());
                (&location[..end], &location[end..])
            }
            None => ("", location),
        }
    }
}

impl PathResolver for UrlResolver {
    fn absolute(&self, id: &str, base: &str) -> String {
        if id.contains("://") {
            return id.to_string();
        }

        let (origin, base_path) = Self::split_origin(base);
        let rooted = id.starts_with('/') || base_path.starts_with('/') || !origin.is_empty();

        let directory = if id.starts_with('/') {
            String::new()
        } else {
            self.parent(base_path)
        };
        let mut parts: Vec<&str> = directory
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();

        for part in id.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                part => parts.push(part),
            }
        }

        let mut resolved = String::from(origin);
        if rooted {
            resolved.push('/');
        }
        resolved.push_str(&parts.join("/"));
        if id.ends_with('/') && !parts.is_empty() {
            resolved.push('/');
        }
        resolved
    }

    fn parent(&self, path: &str) -> String {
        match path.rfind('/') {
            Some(index) => path[..=index].to_string(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_join_against_directory() {
        let resolver = UrlResolver;
        assert_eq!(resolver.absolute("x", "/a/"), "/a/x");
        assert_eq!(resolver.absolute("x", "/a/b"), "/a/x");
        assert_eq!(resolver.absolute("./y", "/lib/main"), "/lib/y");
        assert_eq!(resolver.absolute("../y", "/lib/sub/main"), "/lib/y");
    }

    #[test]
    fn test_rooted_and_remote_ids() {
        let resolver = UrlResolver;
        assert_eq!(resolver.absolute("/etc/unit", "/a/b/"), "/etc/unit");
        assert_eq!(
            resolver.absolute("http://cdn/unit.js", "/a/"),
            "http://cdn/unit.js"
        );
        assert_eq!(
            resolver.absolute("../lib/x", "http://host:8080/app/main.js"),
            "http://host:8080/lib/x"
        );
    }

    #[test]
    fn test_directories_keep_trailing_slash() {
        let resolver = UrlResolver;
        assert_eq!(resolver.absolute("./sub/", "/app/main"), "/app/sub/");
        assert_eq!(resolver.absolute("./", "/app/main"), "/app/");
    }

    #[test]
    fn test_relative_bases_stay_relative() {
        let resolver = UrlResolver;
        assert_eq!(resolver.absolute("x", "fixtures/a/"), "fixtures/a/x");
        assert_eq!(resolver.absolute("./x", "./"), "x");
    }

    #[test]
    fn test_parent() {
        let resolver = UrlResolver;
        assert_eq!(resolver.parent("/a/b/c"), "/a/b/");
        assert_eq!(resolver.parent("/a/b/"), "/a/b/");
        assert_eq!(resolver.parent("c"), "");
    }

    #[test]
    fn test_id_classification() {
        assert!(is_relative("./a"));
        assert!(is_relative("../a"));
        assert!(!is_relative("a"));
        assert!(is_rooted("/a"));
        assert!(is_rooted("file:///a"));
        assert!(!is_rooted("a/b"));
    }

    proptest! {
        #[test]
        fn prop_rooted_results_are_normalised(
            base in prop::collection::vec("[a-z]{1,4}", 0..4),
            id in prop::collection::vec(prop_oneof![
                Just(".".to_string()),
                Just("..".to_string()),
                "[a-z]{1,4}",
            ], 1..6),
        ) {
            let resolver = UrlResolver;
            let base = format!("/{}/", base.join("/"));
            let resolved = resolver.absolute(&id.join("/"), &base);

            prop_assert!(resolved.starts_with('/'));
            prop_assert!(!resolved.contains("//"));
            prop_assert!(resolved.split('/').all(|part| part != "." && part != ".."));

            // A resolved location resolves to itself from anywhere
            prop_assert_eq!(resolver.absolute(&resolved, "/elsewhere/"), resolved.clone());
        }
    }
}
