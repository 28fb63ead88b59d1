//! Configuration types for the SOAP client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// SOAP 1.1 envelope namespace.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Main configuration for the SOAP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoapClientConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// HTTP request settings
    pub http: HttpConfig,
}

impl Default for SoapClientConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// SOAP version used when the caller does not pick one
    pub default_soap_version: SoapVersion,

    /// Maximum response body size to deserialize (bytes)
    pub max_response_size: usize,

    /// Value of the User-Agent header, if any
    pub user_agent: Option<String>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            default_soap_version: SoapVersion::Soap11,
            max_response_size: 10 * 1_048_576, // 10MB
            user_agent: None,
        }
    }
}

/// HTTP settings shared by the bundled transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,

    /// Extra headers added to every request
    pub headers: HashMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            headers: HashMap::new(),
        }
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace URI.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    /// Base Content-Type of requests.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Soap11 => "text/xml",
            Self::Soap12 => "application/soap+xml",
        }
    }

    /// Version string as written in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap11 => "1.1",
            Self::Soap12 => "1.2",
        }
    }
}

impl fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoapVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.1" | "11" => Ok(Self::Soap11),
            "1.2" | "12" => Ok(Self::Soap12),
            other => Err(format!("unsupported SOAP version '{}', expected 1.1 or 1.2", other)),
        }
    }
}
