use http::HeaderValue;
use mime::Mime;
use std::str::FromStr;

/// Returns true if the content type's essence ("type/subtype", without any
/// "+suffix" or parameters) is `expected`. Used by both sides of DoH.
pub(crate) fn content_type_equal(content_type: &HeaderValue, expected: &str) -> bool {
    content_type
        .to_str()
        .ok()
        .and_then(|t| Mime::from_str(t).ok())
        .map_or(false, |t| t.essence_str() == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_equal() {
        let dns = "application/dns-message";
        assert!(content_type_equal(&HeaderValue::from_static(dns), dns));
        assert!(content_type_equal(
            &HeaderValue::from_static("Application/DNS-Message; charset=utf-8"),
            dns
        ));
        assert!(!content_type_equal(&HeaderValue::from_static("text/html"), dns));
        assert!(!content_type_equal(&HeaderValue::from_static("not a mime"), dns));
    }
}
