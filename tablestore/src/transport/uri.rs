//! Endpoint parsing (spec.md section 2, "Endpoint").
//!
//! Mirrors the shape of `examples/HFQR-xitca-web/client/src/connect.rs`'s
//! `Address`/`scheme_to_port` split: a small enum for the scheme this crate
//! actually speaks, plus a parsed `Endpoint` carrying host/port/instance
//! name. Unlike the teacher's `Connect`, there's no DNS resolution state
//! machine here — connections are pooled by `(scheme, host, port)` and
//! resolution happens at connect time in `transport::connection`.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// A parsed service endpoint: `scheme://host[:port]/instance_name`. The
/// instance (table store "instance") is the single path segment, matching
/// spec.md's endpoint grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub instance_name: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, &'static str> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err("endpoint must start with http:// or https://");
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => return Err("endpoint must include a /instance_name path segment"),
        };
        if path.is_empty() {
            return Err("endpoint must include a non-empty instance name");
        }
        if path.contains('/') {
            return Err("endpoint instance name must be a single path segment");
        }

        let (host, port) = match authority.rfind(':') {
            Some(idx) => {
                let host = &authority[..idx];
                let port: u16 = authority[idx + 1..].parse().map_err(|_| "endpoint port is not a valid u16")?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err("endpoint host must not be empty");
        }

        Ok(Self { scheme, host: host.to_string(), port, instance_name: path.to_string() })
    }

    /// The key connections are pooled by (spec.md section 4.3: "keyed by
    /// (scheme, host, port)").
    pub fn pool_key(&self) -> (Scheme, String, u16) {
        (self.scheme, self.host.clone(), self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.scheme, self.host, self.port, self.instance_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_with_explicit_port() {
        let ep = Endpoint::parse("https://example.ots.aliyuncs.com:443/my-instance").unwrap();
        assert_eq!(ep.scheme, Scheme::Https);
        assert_eq!(ep.host, "example.ots.aliyuncs.com");
        assert_eq!(ep.port, 443);
        assert_eq!(ep.instance_name, "my-instance");
    }

    #[test]
    fn defaults_port_from_scheme() {
        let ep = Endpoint::parse("http://localhost/inst").unwrap();
        assert_eq!(ep.port, 80);
    }

    #[test]
    fn rejects_missing_instance_name() {
        assert!(Endpoint::parse("https://example.com").is_err());
        assert!(Endpoint::parse("https://example.com/").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Endpoint::parse("ftp://example.com/inst").is_err());
    }
}
