//! Binder address grammar: `scheme:rest`

use crate::BinderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Udp,
    Unix,
    Unixgram,
    Unixpacket,
}

impl Scheme {
    /// Stream schemes produce one fd per accepted connection; packet
    /// schemes hand over the bound socket itself.
    pub fn is_stream(self) -> bool {
        matches!(self, Scheme::Tcp | Scheme::Unix | Scheme::Unixpacket)
    }
}

/// A parsed binder address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderAddr {
    pub scheme: Scheme,
    /// `host:port` for inet schemes, a filesystem path otherwise
    pub rest: String,
}

impl BinderAddr {
    pub fn parse(addr: &str) -> Result<BinderAddr, BinderError> {
        let (scheme, rest) = addr
            .split_once(':')
            .ok_or_else(|| BinderError::BadAddress(addr.to_string()))?;
        let scheme = match scheme {
            "tcp" => Scheme::Tcp,
            "udp" => Scheme::Udp,
            "unix" => Scheme::Unix,
            "unixgram" => Scheme::Unixgram,
            "unixpacket" => Scheme::Unixpacket,
            _ => return Err(BinderError::BadAddress(addr.to_string())),
        };
        if rest.is_empty() {
            return Err(BinderError::BadAddress(addr.to_string()));
        }
        Ok(BinderAddr {
            scheme,
            rest: rest.to_string(),
        })
    }
}

impl std::fmt::Display for BinderAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Udp => "udp",
            Scheme::Unix => "unix",
            Scheme::Unixgram => "unixgram",
            Scheme::Unixpacket => "unixpacket",
        };
        write!(f, "{scheme}:{}", self.rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inet_and_unix() {
        let a = BinderAddr::parse("tcp:127.0.0.1:2514").unwrap();
        assert_eq!(a.scheme, Scheme::Tcp);
        assert_eq!(a.rest, "127.0.0.1:2514");
        assert!(a.scheme.is_stream());

        let u = BinderAddr::parse("unixgram:/run/skewer.sock").unwrap();
        assert!(!u.scheme.is_stream());
        assert_eq!(u.to_string(), "unixgram:/run/skewer.sock");
    }

    #[test]
    fn rejects_garbage() {
        assert!(BinderAddr::parse("2514").is_err());
        assert!(BinderAddr::parse("sctp:1:2").is_err());
        assert!(BinderAddr::parse("tcp:").is_err());
    }
}
