pub mod quantities;

pub use quantities::ResourceQuantities;

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Must contain only lowercase alphanumeric, '-', or '.'
    // Must start and end with alphanumeric
    let chars: Vec<char> = name.chars().collect();

    if !chars[0].is_ascii_lowercase() && !chars[0].is_ascii_digit() {
        return false;
    }

    if !chars[chars.len() - 1].is_ascii_lowercase() && !chars[chars.len() - 1].is_ascii_digit() {
        return false;
    }

    chars
        .iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
}

/// Validate a qualified label or taint key: an optional DNS-1123 prefix
/// followed by '/', then a name of at most 63 characters made of
/// alphanumerics, '-', '_' or '.', beginning and ending alphanumeric
pub fn is_qualified_name(key: &str) -> bool {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if !is_valid_name(prefix) {
            return false;
        }
    }

    if name.is_empty() || name.len() > 63 {
        return false;
    }

    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }

    bytes
        .iter()
        .all(|c| c.is_ascii_alphanumeric() || *c == b'-' || *c == b'_' || *c == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("nginx"));
        assert!(is_valid_name("my-app"));
        assert!(is_valid_name("my-app-123"));
        assert!(is_valid_name("my.app"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("MyApp")); // uppercase
        assert!(!is_valid_name("-myapp")); // starts with dash
        assert!(!is_valid_name("myapp-")); // ends with dash
        assert!(!is_valid_name("my_app")); // underscore
    }

    #[test]
    fn test_is_qualified_name() {
        assert!(is_qualified_name("key1"));
        assert!(is_qualified_name("node.kubernetes.io/not-ready"));
        assert!(is_qualified_name("dedicated_GPU"));

        assert!(!is_qualified_name(""));
        assert!(!is_qualified_name("/no-prefix"));
        assert!(!is_qualified_name("Bad.Prefix/key"));
        assert!(!is_qualified_name("trailing-"));
    }
}
