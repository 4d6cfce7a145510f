//! Role profiles and client configuration.
//!
//! The portal serves two user roles through near-identical API surfaces. A
//! `RoleProfile` captures everything that differs between them: which path
//! prefixes require credentials, where the auth endpoints live, which storage
//! namespace holds the session, and where to send the user when the session
//! ends.
//!
//! `ClientConfig` is the small persisted configuration for embedding
//! applications, stored at `~/.config/classport/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "classport";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Portal user roles served by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
        }
    }
}

/// Per-role wiring for the request pipeline.
#[derive(Debug, Clone)]
pub struct RoleProfile {
    pub role: Role,
    /// Portal origin, without a trailing slash.
    pub base_url: String,
    /// Path prefixes that require credential injection and renewal handling.
    pub protected_prefixes: Vec<String>,
    /// Endpoint exchanging a renewal credential for a fresh pair.
    pub renewal_path: String,
    /// Endpoint notified on explicit logout, best effort.
    pub logout_path: String,
    /// Route the application should navigate to once the session ends.
    pub login_route: String,
    /// Storage namespace isolating this role's session record.
    pub storage_namespace: String,
}

impl RoleProfile {
    /// Profile for the student-facing portal surface.
    pub fn student(base_url: impl Into<String>) -> Self {
        Self {
            role: Role::Student,
            base_url: trim_trailing_slash(base_url.into()),
            protected_prefixes: vec!["/api/student".to_string()],
            renewal_path: "/api/student/auth/refresh-token".to_string(),
            logout_path: "/api/student/auth/logout".to_string(),
            login_route: "/student/login".to_string(),
            storage_namespace: "classport-student".to_string(),
        }
    }

    /// Profile for the faculty-facing portal surface.
    pub fn faculty(base_url: impl Into<String>) -> Self {
        Self {
            role: Role::Faculty,
            base_url: trim_trailing_slash(base_url.into()),
            protected_prefixes: vec!["/api/faculty".to_string()],
            renewal_path: "/api/faculty/auth/refresh-token".to_string(),
            logout_path: "/api/faculty/auth/logout".to_string(),
            login_route: "/faculty/login".to_string(),
            storage_namespace: "classport-faculty".to_string(),
        }
    }

    /// Whether a path belongs to this role's protected surface.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Whether a path is the renewal endpoint itself.
    pub fn is_renewal_path(&self, path: &str) -> bool {
        path == self.renewal_path
    }

    /// Absolute URL for a portal path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

/// Client configuration persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub last_role: Option<Role>,
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Request timeout override, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_profile_protection() {
        let profile = RoleProfile::student("https://portal.test");
        assert!(profile.is_protected("/api/student/results"));
        assert!(profile.is_protected("/api/student/auth/refresh-token"));
        assert!(!profile.is_protected("/api/faculty/results"));
        assert!(!profile.is_protected("/public/notice"));
    }

    #[test]
    fn test_faculty_profile_protection() {
        let profile = RoleProfile::faculty("https://portal.test");
        assert!(profile.is_protected("/api/faculty/sections"));
        assert!(!profile.is_protected("/api/student/results"));
    }

    #[test]
    fn test_renewal_path_detection() {
        let profile = RoleProfile::student("https://portal.test");
        assert!(profile.is_renewal_path("/api/student/auth/refresh-token"));
        assert!(!profile.is_renewal_path("/api/student/auth/logout"));
        assert!(!profile.is_renewal_path("/api/student/results"));
    }

    #[test]
    fn test_url_for_trims_trailing_slash() {
        let profile = RoleProfile::student("https://portal.test/");
        assert_eq!(
            profile.url_for("/api/student/results"),
            "https://portal.test/api/student/results"
        );
    }

    #[test]
    fn test_roles_use_distinct_namespaces() {
        let student = RoleProfile::student("https://portal.test");
        let faculty = RoleProfile::faculty("https://portal.test");
        assert_ne!(student.storage_namespace, faculty.storage_namespace);
        assert_ne!(student.login_route, faculty.login_route);
    }

    #[test]
    fn test_client_config_timeout() {
        let config = ClientConfig {
            request_timeout_secs: Some(10),
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(ClientConfig::default().request_timeout(), None);
    }
}
