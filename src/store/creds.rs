use crate::binary::jid::Jid;
use crate::crypto::{KeyPair, SignedPreKey};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// The paired companion identity, set after a successful pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Me {
    pub jid: Jid,
    pub name: Option<String>,
}

/// Persistent authentication state. Owned by the store; the core mutates it
/// only through [`CredsUpdate`]s applied via the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creds {
    pub noise_key: KeyPair,
    pub identity_key: KeyPair,
    pub signed_pre_key: SignedPreKey,
    pub registration_id: u32,
    pub adv_secret_key: [u8; 32],
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub me: Option<Me>,
    pub platform: Option<String>,
}

impl Creds {
    /// Bootstrap credentials for a device that has never paired.
    pub fn generate() -> Self {
        let identity_key = KeyPair::new();
        let signed_pre_key = identity_key.create_signed_pre_key(1);

        let mut adv_secret_key = [0u8; 32];
        OsRng.fill_bytes(&mut adv_secret_key);

        Self {
            noise_key: KeyPair::new(),
            identity_key,
            signed_pre_key,
            registration_id: OsRng.gen_range(1u32..=16380),
            adv_secret_key,
            next_pre_key_id: 1,
            first_unuploaded_pre_key_id: 1,
            me: None,
            platform: None,
        }
    }

    /// Merges a partial update. Counter moves keep the invariant
    /// `first_unuploaded_pre_key_id <= next_pre_key_id`.
    pub fn apply_update(&mut self, update: &CredsUpdate) {
        if let Some(me) = &update.me {
            self.me = Some(me.clone());
        }
        if let Some(platform) = &update.platform {
            self.platform = Some(platform.clone());
        }
        if let Some(signed_pre_key) = &update.signed_pre_key {
            self.signed_pre_key = signed_pre_key.clone();
        }
        if let Some(next) = update.next_pre_key_id {
            self.next_pre_key_id = next;
        }
        if let Some(first) = update.first_unuploaded_pre_key_id {
            self.first_unuploaded_pre_key_id = first.min(self.next_pre_key_id);
        }
    }
}

/// Partial credential change, announced on the event bus as `creds.update`.
#[derive(Debug, Clone, Default)]
pub struct CredsUpdate {
    pub me: Option<Me>,
    pub platform: Option<String>,
    pub signed_pre_key: Option<SignedPreKey>,
    pub next_pre_key_id: Option<u32>,
    pub first_unuploaded_pre_key_id: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_satisfies_counter_invariant() {
        let creds = Creds::generate();
        assert!(creds.first_unuploaded_pre_key_id <= creds.next_pre_key_id);
        assert!(creds.registration_id >= 1);
        assert!(creds.me.is_none());
    }

    #[test]
    fn test_apply_update_merges_partially() {
        let mut creds = Creds::generate();
        let original_noise = creds.noise_key.clone();

        creds.apply_update(&CredsUpdate {
            me: Some(Me {
                jid: "5511999999999:4@s.whatsapp.net".parse().unwrap(),
                name: Some("test".to_string()),
            }),
            platform: Some("smba".to_string()),
            ..Default::default()
        });

        assert_eq!(creds.me.as_ref().unwrap().jid.device, 4);
        assert_eq!(creds.platform.as_deref(), Some("smba"));
        assert_eq!(creds.noise_key, original_noise);
    }

    #[test]
    fn test_counter_update_clamps_to_invariant() {
        let mut creds = Creds::generate();
        creds.apply_update(&CredsUpdate {
            next_pre_key_id: Some(31),
            first_unuploaded_pre_key_id: Some(40),
            ..Default::default()
        });
        assert!(creds.first_unuploaded_pre_key_id <= creds.next_pre_key_id);
    }

    #[test]
    fn test_serde_roundtrip() {
        let creds = Creds::generate();
        let json = serde_json::to_string(&creds).unwrap();
        let restored: Creds = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.noise_key, creds.noise_key);
        assert_eq!(restored.signed_pre_key, creds.signed_pre_key);
        assert_eq!(restored.adv_secret_key, creds.adv_secret_key);
    }
}
