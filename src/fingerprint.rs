//! Canonical service fingerprints and the container labels that carry
//! them.
//!
//! A container created by this tool carries three labels: the owning
//! project, the logical service name, and the full serialized
//! [`ServiceSpec`](crate::config::ServiceSpec) that produced it. Those
//! labels are the only state the tool trusts between invocations; the
//! runtime itself is the system of record, there is no side database.

use crate::config::ServiceSpec;

/// Label carrying the owning project name.
pub const LABEL_PROJECT: &str = "io.recompose.project";
/// Label carrying the logical service name.
pub const LABEL_SERVICE: &str = "io.recompose.service";
/// Label carrying the serialized service definition that produced the
/// container. Doubles as the change-detection key and as operator-readable
/// documentation of "what configuration created this".
pub const LABEL_CONFIG: &str = "io.recompose.config";

/// Serialize the full desired definition of a service into a stable,
/// comparable string.
///
/// The output is plain JSON, not a digest: it is stored verbatim in the
/// config label so it can be inspected with `docker inspect`. Maps in the
/// model are sorted, so loading a byte-identical compose file always
/// yields a byte-identical fingerprint, and any field change changes the
/// output.
pub fn fingerprint(spec: &ServiceSpec) -> String {
    serde_json::to_string(spec).expect("service spec serializes to JSON")
}

#[cfg(test)]
mod tests {
    use super::fingerprint;
    use crate::config;

    fn spec(yaml: &str) -> crate::config::ServiceSpec {
        let config = config::from_str(yaml, std::path::PathBuf::from("/tmp/app"))
            .expect("compose text should parse");
        config.services.into_iter().next().expect("one service")
    }

    #[test]
    fn repeated_calls_are_identical() {
        let web = spec("services:\n  web:\n    image: nginx:latest\n");
        assert_eq!(fingerprint(&web), fingerprint(&web));
    }

    #[test]
    fn reparsing_the_same_text_is_identical() {
        let text = "services:\n  web:\n    image: nginx:latest\n    environment:\n      A: 1\n      B: 2\n";
        assert_eq!(fingerprint(&spec(text)), fingerprint(&spec(text)));
    }

    #[test]
    fn environment_order_does_not_matter() {
        let a = spec("services:\n  web:\n    image: nginx\n    environment:\n      A: 1\n      B: 2\n");
        let b = spec("services:\n  web:\n    image: nginx\n    environment:\n      B: 2\n      A: 1\n");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn image_change_changes_fingerprint() {
        let old = spec("services:\n  web:\n    image: nginx:latest\n");
        let new = spec("services:\n  web:\n    image: nginx:1.21\n");
        assert_ne!(fingerprint(&old), fingerprint(&new));
    }

    #[test]
    fn environment_change_changes_fingerprint() {
        let old = spec("services:\n  web:\n    image: nginx\n");
        let new = spec("services:\n  web:\n    image: nginx\n    environment:\n      DEBUG: 1\n");
        assert_ne!(fingerprint(&old), fingerprint(&new));
    }

    #[test]
    fn mount_change_changes_fingerprint() {
        let old = spec("services:\n  web:\n    image: nginx\n    volumes:\n      - data:/var/lib/www\n");
        let new = spec("services:\n  web:\n    image: nginx\n    volumes:\n      - data:/var/lib/www:ro\n");
        assert_ne!(fingerprint(&old), fingerprint(&new));
    }
}
