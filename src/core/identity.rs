//! Process identity and override priority.

use serde::Deserialize;

/// Identity of the running process, used to pick the most specific override.
///
/// Discovery of these values (host address, container port) is left to the embedding
/// application; they are usually supplied through [`Settings`](crate::core::Settings).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessIdentity {
    /// Logical process name
    pub name: Option<String>,
    /// Deployment profile, e.g. `production`
    pub profile: Option<String>,
    /// Host address
    pub ip: Option<String>,
    /// Listening port
    pub port: Option<u16>,
}

impl Default for ProcessIdentity {
    fn default() -> Self {
        Self {
            name: None,
            profile: Some("test".to_string()),
            ip: None,
            port: None,
        }
    }
}

impl ProcessIdentity {
    /// Create an identity with only a process name and the default profile.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the profile.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Set the host address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Candidate override names, most specific first: `ip:port`, `ip`, `profile`, `name`.
    ///
    /// Fields that are absent or blank are skipped; `ip:port` needs both parts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use confcenter::core::ProcessIdentity;
    ///
    /// let identity = ProcessIdentity::named("orders")
    ///     .with_profile("production")
    ///     .with_ip("10.0.0.7")
    ///     .with_port(8080);
    /// assert_eq!(
    ///     identity.candidates(),
    ///     vec!["10.0.0.7:8080", "10.0.0.7", "production", "orders"]
    /// );
    /// ```
    pub fn candidates(&self) -> Vec<String> {
        let ip = non_blank(&self.ip);
        let mut order = Vec::with_capacity(4);
        if let (Some(ip), Some(port)) = (ip, self.port) {
            order.push(format!("{ip}:{port}"));
        }
        order.extend(ip.map(str::to_string));
        order.extend(non_blank(&self.profile).map(str::to_string));
        order.extend(non_blank(&self.name).map(str::to_string));
        order
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
