//! Parsing of `<host>[:<port>]` target suffixes
//!
//! Numeric addresses are parsed directly. Anything else goes through the
//! system resolver, which runs synchronously on the calling thread.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use super::traits::StreamError;

/// Parse an active-open address such as `192.0.2.1:6653`, `[2001:db8::1]:6653`,
/// `localhost:6653`, or a bare host when `default_port` is given.
pub fn parse_inet_active(suffix: &str, default_port: Option<u16>) -> Result<SocketAddr, StreamError> {
    let parse_err = |reason: &str| StreamError::AddressParse {
        target: suffix.to_string(),
        reason: reason.to_string(),
    };

    if suffix.is_empty() {
        return Err(parse_err("empty address"));
    }

    if let Ok(addr) = suffix.parse::<SocketAddr>() {
        return Ok(addr);
    }

    // Bare IP: "192.0.2.1", "2001:db8::1" or "[2001:db8::1]"
    let bare = suffix
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(suffix);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return match default_port {
            Some(port) => Ok(SocketAddr::new(ip, port)),
            None => Err(parse_err("port number required")),
        };
    }

    let (host, port) = match suffix.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| parse_err(&format!("bad port number '{}'", port)))?;
            (host, port)
        }
        None => match default_port {
            Some(port) => (suffix, port),
            None => return Err(parse_err("port number required")),
        },
    };
    if host.is_empty() || host.contains(':') {
        return Err(parse_err("malformed host"));
    }

    let resolved = (host, port)
        .to_socket_addrs()
        .map_err(|e| parse_err(&format!("cannot resolve host '{}': {}", host, e)))?;
    // Prefer IPv4 when the resolver offers both families
    let mut candidates: Vec<SocketAddr> = resolved.collect();
    candidates.sort_by_key(|addr| addr.is_ipv6());
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| parse_err(&format!("host '{}' has no addresses", host)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_with_port() {
        let addr = parse_inet_active("203.0.113.5:6653", None).expect("parse");
        assert_eq!(addr, "203.0.113.5:6653".parse().unwrap());
    }

    #[test]
    fn test_parse_default_port() {
        let addr = parse_inet_active("127.0.0.1", Some(6653)).expect("parse");
        assert_eq!(addr.port(), 6653);

        let addr = parse_inet_active("[::1]", Some(6633)).expect("parse");
        assert_eq!(addr, "[::1]:6633".parse().unwrap());

        let addr = parse_inet_active("::1", Some(6633)).expect("parse");
        assert!(addr.is_ipv6());
    }

    #[test]
    fn test_parse_ipv6_with_port() {
        let addr = parse_inet_active("[2001:db8::1]:9000", None).expect("parse");
        assert_eq!(addr.port(), 9000);
        assert!(addr.is_ipv6());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_inet_active("", Some(1)),
            Err(StreamError::AddressParse { .. })
        ));
        assert!(matches!(
            parse_inet_active("127.0.0.1", None),
            Err(StreamError::AddressParse { .. })
        ));
        assert!(matches!(
            parse_inet_active("127.0.0.1:notaport", Some(1)),
            Err(StreamError::AddressParse { ref reason, .. }) if reason.contains("bad port")
        ));
        assert!(matches!(
            parse_inet_active("localhost:", Some(1)),
            Err(StreamError::AddressParse { ref reason, .. }) if reason.contains("bad port")
        ));
        assert!(matches!(
            parse_inet_active(":6653", Some(1)),
            Err(StreamError::AddressParse { ref reason, .. }) if reason.contains("malformed")
        ));
    }

    #[test]
    fn test_resolve_localhost() {
        let addr = parse_inet_active("localhost:6653", None).expect("resolve");
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 6653);

        let addr = parse_inet_active("localhost", Some(6633)).expect("resolve");
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 6633);
    }
}
