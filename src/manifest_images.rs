//! Shared container-image-reference helpers used by both `installers` (§4.6, images()) and
//! `image_exchange` (§4.9, extractImagesFromManifest) — one regex, one normalization routine,
//! applied to two different kinds of rendered manifest text.

use once_cell::sync::Lazy;
use regex::Regex;

static IMAGE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*-?\s*image:\s*["']?([^\s"'#]+)["']?\s*(?:#.*)?$"#)
        .expect("static image-line regex is valid")
});

/// Line-oriented extraction of `image:` references from rendered YAML, skipping Go-template
/// placeholders and deduping while preserving first-occurrence order (§4.9).
pub fn extract_image_refs(yaml_text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in yaml_text.lines() {
        let Some(caps) = IMAGE_LINE.captures(line) else {
            continue;
        };
        let raw = &caps[1];
        if raw.starts_with("{{") {
            continue;
        }
        let normalized = normalize_image_ref(raw);
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

/// Normalize a container image reference to fully-qualified `host/path:tag` form (§4.6):
/// bare names gain `docker.io/library/`, namespaced names gain `docker.io/`, tagless refs gain
/// `:latest`, digests are preserved (and suppress the `:latest` fallback). Idempotent.
pub fn normalize_image_ref(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let (name_and_tag, digest) = match raw.split_once('@') {
        Some((n, d)) => (n, Some(d)),
        None => (raw, None),
    };

    let looks_like_host = match name_and_tag.split_once('/') {
        Some((first, _)) => first.contains('.') || first.contains(':') || first == "localhost",
        None => false,
    };

    let (host, rest) = if looks_like_host {
        let (h, r) = name_and_tag.split_once('/').expect("looks_like_host implies a slash");
        (h.to_string(), r.to_string())
    } else {
        ("docker.io".to_string(), name_and_tag.to_string())
    };

    let (mut path, tag) = match rest.rsplit_once(':') {
        Some((p, t)) if !t.contains('/') => (p.to_string(), Some(t.to_string())),
        _ => (rest.clone(), None),
    };

    if !looks_like_host && !path.contains('/') {
        path = format!("library/{path}");
    }

    let mut result = format!("{host}/{path}");
    if let Some(d) = digest {
        result.push('@');
        result.push_str(d);
    } else {
        result.push(':');
        result.push_str(&tag.unwrap_or_else(|| "latest".to_string()));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gains_docker_io_library_and_latest() {
        assert_eq!(normalize_image_ref("nginx"), "docker.io/library/nginx:latest");
    }

    #[test]
    fn namespaced_name_gains_docker_io_only() {
        assert_eq!(normalize_image_ref("bitnami/nginx"), "docker.io/bitnami/nginx:latest");
    }

    #[test]
    fn fully_qualified_ref_is_unchanged() {
        let ref_ = "quay.io/jetstack/cert-manager-controller:v1.14.0";
        assert_eq!(normalize_image_ref(ref_), ref_);
    }

    #[test]
    fn digest_is_preserved_without_latest_fallback() {
        let ref_ = "ghcr.io/foo/bar@sha256:abcd1234";
        assert_eq!(normalize_image_ref(ref_), ref_);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_image_ref("nginx");
        let twice = normalize_image_ref(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn extraction_skips_go_template_placeholders() {
        let manifest = "spec:\n  containers:\n    - image: {{ .Values.image }}\n    - image: nginx:1.27\n";
        let refs = extract_image_refs(manifest);
        assert_eq!(refs, vec!["docker.io/library/nginx:1.27".to_string()]);
    }

    #[test]
    fn extraction_dedupes_preserving_first_occurrence() {
        let manifest = "- image: nginx:1.27\n- image: docker.io/library/nginx:1.27\n- image: redis:7\n";
        let refs = extract_image_refs(manifest);
        assert_eq!(
            refs,
            vec![
                "docker.io/library/nginx:1.27".to_string(),
                "docker.io/library/redis:7".to_string()
            ]
        );
    }
}
