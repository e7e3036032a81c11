// Version information for the GeoPrivacy Node

/// Full version string
pub const VERSION: &str = "v0.1.0-2025-08-06";

/// Semantic version number
pub const VERSION_NUMBER: &str = "0.1.0";

/// Build date
pub const BUILD_DATE: &str = "2025-08-06";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "geo-cue-detection",
    "adaptive-pixelation",
    "exif-scrub",
    "pii-redaction",
    "geocode-throttle",
];
