//! Parser for the `[user:pass@]host[:port][/path][:tag]` registry reference grammar (§3
//! `ClusterDescriptor.localRegistry`).

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryRef {
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub tag: Option<String>,
}

impl RegistryRef {
    /// A reference is local when its host is empty or the conventional loopback names
    /// (§3: "distinguishes local ... from external").
    pub fn is_local(&self) -> bool {
        self.host.is_empty() || self.host == "localhost" || self.host == "127.0.0.1"
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

pub fn parse_registry_ref(raw: &str) -> RegistryRef {
    let mut rest = raw;
    let mut username = None;
    let mut password = None;

    if let Some(at_idx) = rest.find('@') {
        let (creds, after) = rest.split_at(at_idx);
        rest = &after[1..];
        if let Some((u, p)) = creds.split_once(':') {
            username = Some(u.to_string());
            password = Some(p.to_string());
        }
    }

    let mut path = None;
    let host_port = if let Some(slash_idx) = rest.find('/') {
        let (hp, after_slash) = rest.split_at(slash_idx);
        path = Some(after_slash[1..].to_string());
        hp
    } else {
        rest
    };

    let mut tag = None;
    if let Some(path_val) = path.take() {
        if let Some(colon_idx) = path_val.rfind(':') {
            tag = Some(path_val[colon_idx + 1..].to_string());
            path = Some(path_val[..colon_idx].to_string());
        } else {
            path = Some(path_val);
        }
    }

    let (host, port) = match host_port.rfind(':') {
        Some(colon_idx) => match host_port[colon_idx + 1..].parse::<u16>() {
            Ok(p) => (host_port[..colon_idx].to_string(), Some(p)),
            Err(_) => (host_port.to_string(), None),
        },
        None => (host_port.to_string(), None),
    };

    RegistryRef {
        username,
        password,
        host,
        port,
        path,
        tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_host() {
        let r = parse_registry_ref("localhost:5000");
        assert_eq!(r.host, "localhost");
        assert_eq!(r.port, Some(5000));
        assert!(r.is_local());
    }

    #[test]
    fn parses_full_reference_with_credentials_path_and_tag() {
        let r = parse_registry_ref("user:pass@registry.example.com:443/my/path:v1");
        assert_eq!(r.username.as_deref(), Some("user"));
        assert_eq!(r.password.as_deref(), Some("pass"));
        assert_eq!(r.host, "registry.example.com");
        assert_eq!(r.port, Some(443));
        assert_eq!(r.path.as_deref(), Some("my/path"));
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert!(!r.is_local());
    }

    #[test]
    fn empty_host_is_local() {
        let r = parse_registry_ref("");
        assert!(r.is_local());
    }
}
