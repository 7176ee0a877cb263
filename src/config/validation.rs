//! Configuration and input validation functions
//!
//! This module provides validation for configuration fields and for the
//! identifiers and CIDRs that arrive through the control API.

use crate::error::{ProvisionError, Result};
use ipnet::IpNet;

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::Config(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(ProvisionError::Config(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(ProvisionError::Config(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate the instance identity used when querying the directory
pub fn validate_instance_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(ProvisionError::Config(
            "instance_id must be set (this instance cannot know which resources it manages)"
                .to_string(),
        ));
    }

    if id.contains('/') || id.chars().any(char::is_whitespace) {
        return Err(ProvisionError::Config(format!(
            "instance_id '{}' must not contain '/' or whitespace",
            id
        )));
    }

    Ok(())
}

/// Validate the directory base URL
pub fn validate_directory_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ProvisionError::Config(format!("Invalid directory URL '{}': {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ProvisionError::Config(format!(
            "Directory URL scheme must be http or https, got '{}'",
            other
        ))),
    }
}

/// Validate listen port (non-zero)
pub fn validate_listen_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(ProvisionError::Config(
            "Listen port cannot be 0".to_string(),
        ));
    }
    Ok(())
}

/// Validate and normalize a CIDR received from a caller.
///
/// Host bits are cleared, so `192.168.1.7/24` becomes `192.168.1.0/24`.
pub fn parse_cidr(cidr: &str) -> Result<IpNet> {
    let net: IpNet = cidr.trim().parse().map_err(|_| {
        ProvisionError::Validation(format!(
            "Invalid CIDR notation: {} (expected format: IP/prefix)",
            cidr
        ))
    })?;
    Ok(net.trunc())
}

/// Validate a resource identifier from the directory or a caller
pub fn validate_resource_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ProvisionError::Validation(
            "Resource id cannot be empty".to_string(),
        ));
    }

    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ProvisionError::Validation(format!(
            "Resource id '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_interface_name() {
        assert!(validate_interface_name("wg0").is_ok());
        assert!(validate_interface_name("wg-test").is_ok());
        assert!(validate_interface_name("wg_test").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("wg@test").is_err());
        assert!(validate_interface_name("toolonginterfacename").is_err());
    }

    #[test]
    fn test_validate_instance_id() {
        assert!(validate_instance_id("vpn-eu-1").is_ok());
        assert!(validate_instance_id("").is_err());
        assert!(validate_instance_id("   ").is_err());
        assert!(validate_instance_id("a/b").is_err());
    }

    #[test]
    fn test_validate_directory_url() {
        assert!(validate_directory_url("http://localhost:5000").is_ok());
        assert!(validate_directory_url("https://directory.example.com/").is_ok());
        assert!(validate_directory_url("ftp://example.com").is_err());
        assert!(validate_directory_url("not a url").is_err());
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(parse_cidr("10.0.0.0/8").unwrap().to_string(), "10.0.0.0/8");
        assert_eq!(
            parse_cidr("192.168.1.7/24").unwrap().to_string(),
            "192.168.1.0/24"
        );
        assert!(parse_cidr("fe80::/64").is_ok());
        assert!(parse_cidr("192.168.1.1").is_err());
        assert!(parse_cidr("192.168.1.0/33").is_err());
    }

    #[test]
    fn test_validate_resource_id() {
        assert!(validate_resource_id("123e4567-e89b-12d3-a456-426614174000").is_ok());
        assert!(validate_resource_id("").is_err());
        assert!(validate_resource_id("../etc").is_err());
    }
}
