use crate::config::ClientConfig;
use crate::proto::{
    AppVersion, ClientPayload, ConnectReason, ConnectType, DevicePairingRegistrationData,
    DeviceProps, Platform, PlatformType, ReleaseChannel, UserAgent, WebInfo, WebSubPlatform,
};
use crate::store::creds::Creds;
use prost::Message;

fn build_base_payload(config: &ClientConfig) -> ClientPayload {
    ClientPayload {
        user_agent: Some(UserAgent {
            platform: Some(Platform::Web as i32),
            release_channel: Some(ReleaseChannel::Release as i32),
            app_version: Some(AppVersion {
                primary: Some(config.version.major),
                secondary: Some(config.version.minor),
                tertiary: Some(config.version.patch),
                quaternary: Some(config.version.build),
                ..Default::default()
            }),
            mcc: Some("000".to_string()),
            mnc: Some("000".to_string()),
            os_version: Some(config.browser.version.clone()),
            manufacturer: Some(config.browser.vendor.clone()),
            device: Some(config.browser.name.clone()),
            os_build_number: Some(config.browser.version.clone()),
            locale_language_iso_639_1: Some("en".to_string()),
            locale_country_iso_3166_1_alpha_2: Some("en".to_string()),
        }),
        web_info: Some(WebInfo {
            web_sub_platform: Some(WebSubPlatform::WebBrowser as i32),
            ..Default::default()
        }),
        connect_type: Some(ConnectType::WifiUnknown as i32),
        connect_reason: Some(ConnectReason::UserActivated as i32),
        ..Default::default()
    }
}

/// Login payload for a device that already holds a paired identity.
pub fn build_login_payload(creds: &Creds, config: &ClientConfig) -> ClientPayload {
    let me = creds.me.as_ref().expect("login payload requires creds.me");
    let mut payload = build_base_payload(config);
    payload.username = me.jid.user.parse::<u64>().ok();
    payload.device = Some(u32::from(me.jid.device));
    payload.passive = Some(true);
    payload
}

fn browser_platform_type(name: &str) -> PlatformType {
    match name.to_ascii_lowercase().as_str() {
        "chrome" => PlatformType::Chrome,
        "firefox" => PlatformType::Firefox,
        "safari" => PlatformType::Safari,
        "edge" => PlatformType::Edge,
        "opera" => PlatformType::Opera,
        "desktop" => PlatformType::Desktop,
        _ => PlatformType::Unknown,
    }
}

/// Registration payload for a device that has never paired; carries the
/// companion registration data the phone verifies against the QR material.
pub fn build_registration_payload(creds: &Creds, config: &ClientConfig) -> ClientPayload {
    let mut payload = build_base_payload(config);

    let device_props = DeviceProps {
        os: Some(config.browser.vendor.clone()),
        version: Some(AppVersion {
            primary: Some(0),
            secondary: Some(1),
            tertiary: Some(0),
            ..Default::default()
        }),
        platform_type: Some(browser_platform_type(&config.browser.name) as i32),
        require_full_sync: Some(false),
    };

    let version_string = format!(
        "{}.{}.{}",
        config.version.major, config.version.minor, config.version.patch
    );
    let build_hash: [u8; 16] = md5::compute(version_string.as_bytes()).into();

    payload.device_pairing_data = Some(DevicePairingRegistrationData {
        e_regid: Some(creds.registration_id.to_be_bytes().to_vec()),
        e_keytype: Some(vec![crate::crypto::key_pair::DJB_TYPE]),
        e_ident: Some(creds.identity_key.public_key.to_vec()),
        e_skey_id: Some(creds.signed_pre_key.key_id.to_be_bytes()[1..].to_vec()),
        e_skey_val: Some(creds.signed_pre_key.key_pair.public_key.to_vec()),
        e_skey_sig: Some(creds.signed_pre_key.signature.to_vec()),
        build_hash: Some(build_hash.to_vec()),
        device_props: Some(device_props.encode_to_vec()),
    });
    payload.passive = Some(false);
    payload.pull = Some(false);
    payload
}

/// Serialized payload for the handshake finish message: login when a paired
/// identity exists, registration otherwise.
pub fn build_handshake_payload(creds: &Creds, config: &ClientConfig) -> Vec<u8> {
    let payload = if creds.me.is_some() {
        build_login_payload(creds, config)
    } else {
        build_registration_payload(creds, config)
    };
    payload.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::creds::Me;

    #[test]
    fn test_registration_payload_shape() {
        let creds = Creds::generate();
        let config = ClientConfig::default();
        let payload = build_registration_payload(&creds, &config);

        assert_eq!(payload.passive, Some(false));
        let reg = payload.device_pairing_data.unwrap();
        assert_eq!(reg.e_regid.unwrap().len(), 4);
        assert_eq!(reg.e_keytype.unwrap(), vec![5]);
        assert_eq!(reg.e_skey_id.unwrap().len(), 3);
        assert_eq!(reg.e_skey_sig.unwrap().len(), 64);
        assert_eq!(reg.build_hash.unwrap().len(), 16);
    }

    #[test]
    fn test_login_payload_shape() {
        let mut creds = Creds::generate();
        creds.me = Some(Me {
            jid: "5511999999999:7@s.whatsapp.net".parse().unwrap(),
            name: None,
        });
        let config = ClientConfig::default();
        let payload = build_login_payload(&creds, &config);

        assert_eq!(payload.username, Some(5511999999999));
        assert_eq!(payload.device, Some(7));
        assert_eq!(payload.passive, Some(true));
        assert!(payload.device_pairing_data.is_none());
    }

    #[test]
    fn test_handshake_payload_picks_flow() {
        let config = ClientConfig::default();
        let fresh = Creds::generate();
        let registration = build_handshake_payload(&fresh, &config);

        let mut paired = Creds::generate();
        paired.me = Some(Me {
            jid: "1234567890@s.whatsapp.net".parse().unwrap(),
            name: None,
        });
        let login = build_handshake_payload(&paired, &config);

        assert_ne!(registration, login);
    }
}
