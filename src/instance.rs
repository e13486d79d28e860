//! Instance specification and creation result types.

use secrecy::SecretString;
use serde::Deserialize;

/// Specification for a single database instance.
///
/// Submitted by the provisioning layer and immutable afterwards. `name` is
/// the unique key; uniqueness is enforced by the container engine's own
/// namespace, not by this crate.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSpec {
    /// Unique instance name (becomes the container name).
    pub name: String,
    /// Name of the database to create inside the instance.
    pub db_name: String,
    /// Database superuser name.
    pub db_username: String,
    /// Database superuser password.
    pub db_password: SecretString,
    /// External port to expose the instance on. Allocated from the
    /// ephemeral range when absent.
    pub requested_port: Option<u16>,
}

/// Result of a successful instance creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInstance {
    /// Engine-assigned container id.
    pub container_id: String,
    /// Hostname end clients should connect to.
    pub host: String,
    /// External port the database is mapped to.
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes() {
        let spec: InstanceSpec = serde_json::from_str(
            r#"{
                "name": "test1",
                "db_name": "foo",
                "db_username": "bar",
                "db_password": "baz",
                "requested_port": 55432
            }"#,
        )
        .unwrap();

        assert_eq!(spec.name, "test1");
        assert_eq!(spec.requested_port, Some(55432));
    }

    #[test]
    fn test_port_optional() {
        let spec: InstanceSpec = serde_json::from_str(
            r#"{"name": "n", "db_name": "d", "db_username": "u", "db_password": "p"}"#,
        )
        .unwrap();

        assert_eq!(spec.requested_port, None);
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let spec = InstanceSpec {
            name: "n".to_string(),
            db_name: "d".to_string(),
            db_username: "u".to_string(),
            db_password: SecretString::from("hunter2"),
            requested_port: None,
        };

        assert!(!format!("{spec:?}").contains("hunter2"));
    }
}
