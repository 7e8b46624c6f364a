//! Inbound webhook request value

use std::collections::BTreeMap;
use std::net::IpAddr;

/// Everything the bridge needs to know about one webhook delivery.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    /// Peer address of the connection
    pub source_addr: Option<IpAddr>,
    pub query: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            ..Self::default()
        }
    }

    /// A postback delivery carrying `body`
    pub fn post(body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST").with_body(body)
    }

    /// A pingback delivery (query only)
    pub fn get() -> Self {
        Self::new("GET")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn with_source(mut self, addr: IpAddr) -> Self {
        self.source_addr = Some(addr);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Non-empty query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Best-effort caller identity for logs: forwarded-for, real-ip, then
    /// the peer address.
    pub fn client_identity(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return first.to_string();
            }
        }
        if let Some(real_ip) = self.header("x-real-ip").filter(|s| !s.trim().is_empty()) {
            return real_ip.trim().to_string();
        }
        self.source_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn is_gzip_encoded(&self) -> bool {
        self.header("content-encoding")
            .map(|v| v.split(',').any(|enc| enc.trim().eq_ignore_ascii_case("gzip")))
            .unwrap_or(false)
    }
}
