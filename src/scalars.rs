//! Custom scalars shared by every synthesized type.

pub const JSON: &str = "JSON";
pub const VOID: &str = "Void";
pub const DATE: &str = "Date";
pub const DATE_TIME: &str = "DateTime";
pub const TIME: &str = "Time";
pub const TIMESTAMP: &str = "Timestamp";
pub const PHONE_NUMBER: &str = "PhoneNumber";
pub const URL: &str = "URL";
pub const EMAIL_ADDRESS: &str = "EmailAddress";
pub const IPV4: &str = "IPv4";
pub const IPV6: &str = "IPv6";

/// Scalars every GraphQL schema has without declaring them.
pub const BUILT_IN_SCALARS: &[&str] = &["String", "Int", "Float", "Boolean", "ID"];

/// A custom scalar definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarDefinition {
    pub name: &'static str,
    pub description: &'static str,
}

const CUSTOM_SCALARS: &[ScalarDefinition] = &[
    ScalarDefinition {
        name: JSON,
        description: "Arbitrary JSON value",
    },
    ScalarDefinition {
        name: VOID,
        description: "Represents NULL values",
    },
    ScalarDefinition {
        name: DATE,
        description: "A date string, such as 2007-12-03, compliant with the full-date format outlined in section 5.6 of the RFC 3339",
    },
    ScalarDefinition {
        name: DATE_TIME,
        description: "A date-time string at UTC, such as 2007-12-03T10:15:30Z, compliant with the date-time format outlined in section 5.6 of the RFC 3339",
    },
    ScalarDefinition {
        name: TIME,
        description: "A time string at UTC, such as 10:15:30Z, compliant with the full-time format outlined in section 5.6 of the RFC 3339",
    },
    ScalarDefinition {
        name: TIMESTAMP,
        description: "The javascript Date as integer. Type represents date and time as number of milliseconds from start of UNIX epoch.",
    },
    ScalarDefinition {
        name: PHONE_NUMBER,
        description: "A field whose value conforms to the standard E.164 format",
    },
    ScalarDefinition {
        name: URL,
        description: "A field whose value conforms to the standard URL format as specified in RFC3986",
    },
    ScalarDefinition {
        name: EMAIL_ADDRESS,
        description: "A field whose value conforms to the standard internet email address format as specified in RFC822",
    },
    ScalarDefinition {
        name: IPV4,
        description: "A field whose value is a IPv4 address",
    },
    ScalarDefinition {
        name: IPV6,
        description: "A field whose value is a IPv6 address",
    },
];

/// The custom scalars registered for one compilation.
#[derive(Debug, Clone)]
pub struct ScalarRegistry {
    scalars: Vec<ScalarDefinition>,
}

impl ScalarRegistry {
    /// Build the registry. `Timestamp` is left out when `include_timestamp` is false.
    pub fn new(include_timestamp: bool) -> Self {
        let scalars = CUSTOM_SCALARS
            .iter()
            .filter(|s| include_timestamp || s.name != TIMESTAMP)
            .cloned()
            .collect();
        Self { scalars }
    }

    pub fn scalars(&self) -> &[ScalarDefinition] {
        &self.scalars
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scalars.iter().any(|s| s.name == name)
    }

    /// Scalar for a JSON Schema string `format`, if it names a registered one.
    pub fn for_format(&self, format: &str) -> Option<&'static str> {
        let name = match format {
            "date" => DATE,
            "date-time" => DATE_TIME,
            "time" => TIME,
            "email" => EMAIL_ADDRESS,
            "uri" | "url" => URL,
            "ipv4" => IPV4,
            "ipv6" => IPV6,
            "phone" => PHONE_NUMBER,
            _ => return None,
        };
        self.contains(name).then_some(name)
    }
}

impl Default for ScalarRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}
