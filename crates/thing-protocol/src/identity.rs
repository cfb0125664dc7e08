use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required identity field that was left empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("identity field `{0}` must not be empty")]
pub struct MissingField(pub &'static str);

/// Identifies one device within a cloud IoT registry.
///
/// Immutable once built; the broker client id and the token audience are
/// both derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Cloud project that owns the registry.
    pub project_id: String,
    /// Cloud region of the registry (e.g. `asia-east1`).
    pub location: String,
    /// Device registry name.
    pub registry: String,
    /// Device name, unique within the registry.
    pub device_id: String,
}

impl Identity {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        registry: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
            registry: registry.into(),
            device_id: device_id.into(),
        }
    }

    /// Broker client identifier:
    /// `projects/{project}/locations/{location}/registries/{registry}/devices/{device}`.
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.location, self.registry, self.device_id
        )
    }

    /// Audience claim for signed auth tokens. The broker expects the project id.
    pub fn audience(&self) -> &str {
        &self.project_id
    }

    /// Check that every field is non-empty, reporting the first one that isn't.
    pub fn validate(&self) -> Result<(), MissingField> {
        let fields = [
            ("project_id", &self.project_id),
            ("location", &self.location),
            ("registry", &self.registry),
            ("device_id", &self.device_id),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(MissingField(name)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.client_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> Identity {
        Identity::new("test-project", "test-location", "test-registry", "test-device")
    }

    #[test]
    fn client_id_format() {
        assert_eq!(
            test_identity().client_id(),
            "projects/test-project/locations/test-location/registries/test-registry/devices/test-device"
        );
    }

    #[test]
    fn client_id_is_deterministic() {
        let a = test_identity();
        let b = a.clone();
        assert_eq!(a.client_id(), b.client_id());
        assert_eq!(format!("{a}"), a.client_id());
    }

    #[test]
    fn audience_is_project() {
        assert_eq!(test_identity().audience(), "test-project");
    }

    #[test]
    fn validate_accepts_complete_identity() {
        assert!(test_identity().validate().is_ok());
    }

    #[test]
    fn validate_reports_first_empty_field() {
        let mut id = test_identity();
        id.registry = String::new();
        id.device_id = "  ".into();
        assert_eq!(id.validate(), Err(MissingField("registry")));

        let err = Identity::new("", "", "", "").validate().unwrap_err();
        assert_eq!(err.to_string(), "identity field `project_id` must not be empty");
    }

    #[test]
    fn deserialize_from_json() {
        let json = r#"{
            "project_id": "my-project",
            "location": "asia-east1",
            "registry": "my-registry",
            "device_id": "deviceName"
        }"#;
        let id: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(
            id.client_id(),
            "projects/my-project/locations/asia-east1/registries/my-registry/devices/deviceName"
        );
    }
}
