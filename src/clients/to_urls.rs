use std::io;
use std::iter;
use std::slice;
use std::vec;
use url::Url;

/// A trait for objects which can be converted or resolved to one or more
/// [`Url`] values. Heavily inspired by [`ToSocketAddrs`](std::net::ToSocketAddrs).
pub trait ToUrls {
    type Iter: Iterator<Item = Url>;

    fn to_urls(&self) -> io::Result<Self::Iter>;
}

impl ToUrls for &str {
    type Iter = vec::IntoIter<Url>;

    fn to_urls(&self) -> io::Result<vec::IntoIter<Url>> {
        let url = self
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("'{}': {}", self, e)))?;
        Ok(vec![url].into_iter())
    }
}

impl ToUrls for Url {
    type Iter = iter::Once<Url>;

    fn to_urls(&self) -> io::Result<Self::Iter> {
        Ok(iter::once(self.clone()))
    }
}

impl<'a> ToUrls for &'a [Url] {
    type Iter = iter::Cloned<slice::Iter<'a, Url>>;

    fn to_urls(&self) -> io::Result<Self::Iter> {
        Ok(self.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_urls() {
        let urls: Vec<Url> = "https://dns.google/dns-query".to_urls().unwrap().collect();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].host_str(), Some("dns.google"));

        assert_eq!(
            "no scheme".to_urls().unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
