//! Property namespace the analysis plugin writes onto inspected artifacts.

use pvt_gateways::Properties;

pub const INSPECTION_STATUS: &str = "blackduck.inspectionStatus";
pub const EXTERNAL_ID: &str = "blackduck.externalId";
pub const COMPONENT_VERSION_URL: &str = "blackduck.componentVersionUrl";
pub const POLICY_STATUS: &str = "blackduck.policyStatus";
pub const HIGH_VULNERABILITIES: &str = "blackduck.highVulnerabilities";
pub const MEDIUM_VULNERABILITIES: &str = "blackduck.mediumVulnerabilities";
pub const LOW_VULNERABILITIES: &str = "blackduck.lowVulnerabilities";

/// Values of `blackduck.inspectionStatus`.
pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILURE: &str = "FAILURE";

/// Parse a severity count, treating absent or malformed values as zero.
pub fn count(properties: &Properties, key: &str) -> u32 {
    properties
        .get(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
