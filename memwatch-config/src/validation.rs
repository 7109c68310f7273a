//! Custom validation functions shared by the configuration sections.

use std::net::SocketAddr;

use memwatch_protocol::MAX_NAME_LENGTH;
use validator::ValidationError;

/// Every registry name must fit a wire name record with its terminator.
pub fn validate_names(names: &[String]) -> Result<(), ValidationError> {
    if names
        .iter()
        .any(|name| name.is_empty() || name.len() >= MAX_NAME_LENGTH)
    {
        return Err(ValidationError::new("invalid_name_length"));
    }
    Ok(())
}

pub fn validate_socket_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_socket_addr"))
}

/// Accepts the directive syntax `tracing-subscriber`'s `EnvFilter` uses,
/// without depending on it.
pub fn validate_filter(filter: &str) -> Result<(), ValidationError> {
    let valid = !filter.trim().is_empty()
        && filter.split(',').all(|directive| {
            let level = directive.rsplit('=').next().unwrap_or_default().trim();
            !level.is_empty() && !level.contains(char::is_whitespace)
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_filter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(validate_names(&["textures".into(), "audio".into()]).is_ok());
        assert!(validate_names(&[String::new()]).is_err());
        assert!(validate_names(&["exactly-sixteen!".into()]).is_err());
    }

    #[test]
    fn test_socket_addr() {
        assert!(validate_socket_addr("127.0.0.1:50007").is_ok());
        assert!(validate_socket_addr("[::1]:80").is_ok());
        assert!(validate_socket_addr("localhost").is_err());
    }

    #[test]
    fn test_filter() {
        assert!(validate_filter("info").is_ok());
        assert!(validate_filter("memwatch_core=debug,warn").is_ok());
        assert!(validate_filter("  ").is_err());
        assert!(validate_filter("memwatch=").is_err());
    }
}
