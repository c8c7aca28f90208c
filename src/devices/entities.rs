use std::fmt;

/// Push platform a device registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform value as stored by the registration flow.
/// Anything other than android or ios is kept verbatim so it can be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePlatform {
    Known(Platform),
    Unrecognized(String),
}

impl From<&str> for DevicePlatform {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "android" => DevicePlatform::Known(Platform::Android),
            "ios" => DevicePlatform::Known(Platform::Ios),
            _ => DevicePlatform::Unrecognized(value.to_string()),
        }
    }
}

impl From<String> for DevicePlatform {
    fn from(value: String) -> Self {
        DevicePlatform::from(value.as_str())
    }
}

impl From<Platform> for DevicePlatform {
    fn from(platform: Platform) -> Self {
        DevicePlatform::Known(platform)
    }
}

impl fmt::Display for DevicePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePlatform::Known(platform) => platform.fmt(f),
            DevicePlatform::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// A registered push endpoint. Read-only for the duration of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub platform: DevicePlatform,
    pub token: String,
}

#[cfg(test)]
impl Device {
    pub fn new(id: i64, platform: impl Into<DevicePlatform>, token: impl Into<String>) -> Self {
        Self {
            id,
            user_id: 0,
            role_id: 0,
            tenant_id: 0,
            name: String::new(),
            platform: platform.into(),
            token: token.into(),
        }
    }
}
