//! Hub connection string parsing.

use crate::FleetError;

/// Parsed hub owner connection string.
///
/// Connection strings are `key=value` pairs delimited by `;`, for example
/// `HostName=myhub.example.net;SharedAccessKeyName=owner;SharedAccessKey=abc`.
/// Only `HostName` is required by the simulator; the access key entries are
/// carried opaquely for transports that need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConnectionString {
    pub host_name: String,
    pub shared_access_key_name: Option<String>,
    pub shared_access_key: Option<String>,
}

impl HubConnectionString {
    /// Parses an owner connection string.
    ///
    /// # Errors
    /// - `FleetError::InvalidConnectionString` - A segment is not `key=value`,
    ///   or no non-empty `HostName` entry is present
    pub fn parse(raw: &str) -> Result<Self, FleetError> {
        let mut host_name = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;

        for segment in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                FleetError::InvalidConnectionString {
                    reason: format!("segment '{segment}' is not a key=value pair"),
                }
            })?;

            match key.trim() {
                "HostName" => host_name = Some(value.trim().to_string()),
                "SharedAccessKeyName" => {
                    shared_access_key_name = Some(value.trim().to_string());
                }
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                _ => {} // Unknown entries are ignored
            }
        }

        let host_name = host_name
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FleetError::InvalidConnectionString {
                reason: "missing HostName entry".to_string(),
            })?;

        Ok(Self {
            host_name,
            shared_access_key_name,
            shared_access_key,
        })
    }
}
