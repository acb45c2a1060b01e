//! Identity of the scraped target as an OTLP resource

use std::net::IpAddr;

use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::resource::v1::Resource;

const SERVICE_NAME: &str = "service.name";
const SERVICE_INSTANCE_ID: &str = "service.instance.id";
const HOST_NAME: &str = "host.name";
const JOB: &str = "job";
const INSTANCE: &str = "instance";
const PORT: &str = "port";
const SCHEME: &str = "scheme";

/// Target a transaction's samples belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub job: String,
    pub instance: String,
    pub host: String,
    pub port: String,
    pub scheme: String,
}

impl ResourceIdentity {
    pub fn new(job: &str, instance: &str, scheme: &str) -> Self {
        let (host, port) = split_host_port(instance);
        Self {
            job: job.to_string(),
            instance: instance.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            scheme: scheme.to_string(),
        }
    }

    pub fn attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![
            string_attribute(SERVICE_NAME, &self.job),
            string_attribute(SERVICE_INSTANCE_ID, &self.instance),
        ];
        if is_discernible_host(&self.host) {
            attributes.push(string_attribute(HOST_NAME, &self.host));
        }
        attributes.extend([
            string_attribute(JOB, &self.job),
            string_attribute(INSTANCE, &self.instance),
            string_attribute(PORT, &self.port),
            string_attribute(SCHEME, &self.scheme),
        ]);
        attributes
    }

    pub fn to_resource(&self) -> Resource {
        Resource {
            attributes: self.attributes(),
            ..Default::default()
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals. An instance without
/// a port yields an empty port.
pub fn split_host_port(instance: &str) -> (&str, &str) {
    if let Some(rest) = instance.strip_prefix('[') {
        if let Some((host, after)) = rest.split_once(']') {
            return (host, after.strip_prefix(':').unwrap_or(""));
        }
        return (instance, "");
    }

    match instance.rsplit_once(':') {
        // A bare IPv6 address has several colons and no port
        Some((host, _)) if host.contains(':') => (instance, ""),
        Some((host, port)) => (host, port),
        None => (instance, ""),
    }
}

/// Loopback, unspecified and link-local addresses say nothing about where
/// the target runs
pub fn is_discernible_host(host: &str) -> bool {
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => !(ip.is_loopback() || ip.is_unspecified() || ip.is_link_local()),
        Ok(IpAddr::V6(ip)) => {
            !(ip.is_loopback() || ip.is_unspecified() || ip.is_unicast_link_local())
        }
        Err(_) => true,
    }
}

pub(crate) fn string_attribute(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
        attributes
            .iter()
            .find(|kv| kv.key == key)
            .and_then(|kv| kv.value.as_ref())
            .and_then(|v| match &v.value {
                Some(any_value::Value::StringValue(s)) => Some(s.as_str()),
                _ => None,
            })
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("api.internal:9090"), ("api.internal", "9090"));
        assert_eq!(split_host_port("[2001:db8::1]:9100"), ("2001:db8::1", "9100"));
        assert_eq!(split_host_port("[::1]"), ("::1", ""));
        assert_eq!(split_host_port("2001:db8::1"), ("2001:db8::1", ""));
        assert_eq!(split_host_port("api"), ("api", ""));
    }

    #[test]
    fn test_discernible_host() {
        assert!(is_discernible_host("api.internal"));
        assert!(is_discernible_host("10.0.0.4"));
        assert!(is_discernible_host("2001:db8::1"));
        for host in [
            "",
            "localhost",
            "LOCALHOST",
            "127.0.0.1",
            "127.0.0.2",
            "0.0.0.0",
            "169.254.10.1",
            "::1",
            "0:0:0:0:0:0:0:1",
            "::",
            "fe80::1",
        ] {
            assert!(!is_discernible_host(host), "{host}");
        }
    }

    #[test]
    fn test_attributes() {
        let identity = ResourceIdentity::new("api", "api.internal:9090", "https");
        let attributes = identity.attributes();

        assert_eq!(attribute(&attributes, "service.name"), Some("api"));
        assert_eq!(
            attribute(&attributes, "service.instance.id"),
            Some("api.internal:9090")
        );
        assert_eq!(attribute(&attributes, "host.name"), Some("api.internal"));
        assert_eq!(attribute(&attributes, "port"), Some("9090"));
        assert_eq!(attribute(&attributes, "scheme"), Some("https"));
        assert_eq!(attribute(&attributes, "job"), Some("api"));
    }

    #[test]
    fn test_loopback_has_no_host_name() {
        let identity = ResourceIdentity::new("api", "localhost:8080", "http");
        let resource = identity.to_resource();

        assert_eq!(attribute(&resource.attributes, "host.name"), None);
        assert_eq!(attribute(&resource.attributes, "port"), Some("8080"));

        let identity = ResourceIdentity::new("api", "[fe80::1]:9100", "http");
        assert_eq!(attribute(&identity.attributes(), "host.name"), None);
        let identity = ResourceIdentity::new("api", "127.0.0.2:9100", "http");
        assert_eq!(attribute(&identity.attributes(), "host.name"), None);
    }
}
