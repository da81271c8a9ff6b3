//! Actors and the roles they act under

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roles supplied by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    /// Plant coordinator that owns the dispatch
    Coordinador,
    /// Transport company coordinator
    CoordinadorTransporte,
    /// Yard supervisor
    Supervisor,
    /// Gate / access control
    ControlAcceso,
    /// Driver
    Chofer,
    /// Automatic transitions
    Sistema,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Coordinador => "coordinador",
            Role::CoordinadorTransporte => "coordinador_transporte",
            Role::Supervisor => "supervisor",
            Role::ControlAcceso => "control_acceso",
            Role::Chofer => "chofer",
            Role::Sistema => "sistema",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "coordinador" => Ok(Role::Coordinador),
            "coordinador_transporte" => Ok(Role::CoordinadorTransporte),
            "supervisor" => Ok(Role::Supervisor),
            "control_acceso" => Ok(Role::ControlAcceso),
            "chofer" => Ok(Role::Chofer),
            "sistema" => Ok(Role::Sistema),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Who is asking for a change; trusted as given by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn system() -> Self {
        Self::new("system", Role::Sistema)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("control_acceso").unwrap(), Role::ControlAcceso);
        assert_eq!(
            Role::from_str("coordinador_transporte").unwrap(),
            Role::CoordinadorTransporte
        );
        assert!(Role::from_str("operador").is_err());
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::ControlAcceso).unwrap();
        assert_eq!(json, "\"control_acceso\"");
    }
}
