use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const SERVER_JID: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const HOSTED_SERVER: &str = "hosted";

#[derive(Debug, Error)]
pub enum JidError {
    #[error("invalid JID format: {0}")]
    InvalidFormat(String),
}

/// Address of an entity on the service: `<user>[:device]@<server>`.
///
/// The `agent` field only exists on the wire (ad-jid form); it selects the
/// server on decode and is not rendered in the string form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: u8,
    pub device: u16,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            agent: 0,
            device: 0,
        }
    }

    pub fn server_jid() -> Self {
        Self::new("", SERVER_JID)
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.server.is_empty()
    }

    pub fn is_lid(&self) -> bool {
        self.server == HIDDEN_USER_SERVER
    }

    /// The same address with the device index stripped.
    pub fn to_non_device(&self) -> Jid {
        Jid {
            user: self.user.clone(),
            server: self.server.clone(),
            agent: self.agent,
            device: 0,
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else if self.device != 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) if !srv.is_empty() => (u, srv),
            Some(_) => return Err(JidError::InvalidFormat(s.to_string())),
            // A bare server name is a valid server-only JID.
            None => ("", s),
        };

        let (user, device) = match user_part.split_once(':') {
            Some((u, d)) => {
                let device = d
                    .parse::<u16>()
                    .map_err(|_| JidError::InvalidFormat(s.to_string()))?;
                (u, device)
            }
            None => (user_part, 0),
        };

        Ok(Jid {
            user: user.to_string(),
            server: server.to_string(),
            agent: 0,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_jid() {
        let jid: Jid = "5511999999999@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "5511999999999");
        assert_eq!(jid.server, DEFAULT_USER_SERVER);
        assert_eq!(jid.device, 0);
    }

    #[test]
    fn test_parse_device_jid() {
        let jid: Jid = "5511999999999:23@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.device, 23);
        assert_eq!(jid.to_string(), "5511999999999:23@s.whatsapp.net");
    }

    #[test]
    fn test_parse_server_only() {
        let jid: Jid = "s.whatsapp.net".parse().unwrap();
        assert!(jid.user.is_empty());
        assert_eq!(jid.to_string(), "s.whatsapp.net");
    }

    #[test]
    fn test_display_roundtrip() {
        for s in [
            "abc@g.us",
            "5511999999999@s.whatsapp.net",
            "123:4@lid",
            "status@broadcast",
        ] {
            let jid: Jid = s.parse().unwrap();
            assert_eq!(jid.to_string(), s);
        }
    }

    #[test]
    fn test_strip_device() {
        let jid: Jid = "123:9@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.to_non_device().to_string(), "123@s.whatsapp.net");
    }

    #[test]
    fn test_invalid_device_suffix() {
        assert!("user:notanumber@s.whatsapp.net".parse::<Jid>().is_err());
    }
}
