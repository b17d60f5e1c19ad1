/// HTTP methods this client can send. Only the four the wire format names
/// are dispatchable; `CONNECT` is deliberately not a variant here; it only
/// exists in this crate as a sizing constant (see `LONGEST_METHOD_LEN`),
/// matching the original source's comment that `CONNECT` is the longest
/// method name in RFC 2616 and is used purely to bound request-buffer
/// minimum-size checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Head => "HEAD",
        }
    }

    /// `true` for methods whose response never carries a body per RFC 7230
    /// -- used for HEAD suppression in the response parser driver.
    pub fn suppresses_response_body(&self) -> bool {
        matches!(*self, Method::Head)
    }
}

/// Longest method name string length per RFC 2616 (`CONNECT`, 7 bytes).
/// Not a method this client ever sends; used only to size the worst-case
/// request line when validating a caller-supplied request buffer.
pub const LONGEST_METHOD_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn longest_method_len_matches_connect() {
        assert_eq!(LONGEST_METHOD_LEN, "CONNECT".len());
    }

    #[test]
    fn head_suppresses_body() {
        assert!(Method::Head.suppresses_response_body());
        assert!(!Method::Get.suppresses_response_body());
    }
}
