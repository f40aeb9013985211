//! Fixed string-token dictionary shared with the server.
//!
//! The tables are part of the wire contract: a string present here must be
//! emitted as its token, never inline, or the peer rejects the stanza.

use std::collections::HashMap;
use std::sync::OnceLock;

pub const LIST_EMPTY: u8 = 0;
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_1: u8 = 237;
pub const DICTIONARY_2: u8 = 238;
pub const DICTIONARY_3: u8 = 239;
pub const AD_JID: u8 = 247;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_32: u8 = 254;
pub const NIBBLE_8: u8 = 255;

/// Longest string the packed nibble/hex forms can carry.
pub const PACKED_MAX: usize = 127;

pub const DICT_VERSION: u8 = 3;

static SINGLE_BYTE_TOKENS: &[&str] = &[
    "",
    "xmlstreamstart",
    "xmlstreamend",
    "s.whatsapp.net",
    "type",
    "participant",
    "from",
    "receipt",
    "id",
    "notification",
    "disappearing_mode",
    "status",
    "jid",
    "broadcast",
    "user",
    "devices",
    "device_hash",
    "to",
    "offline",
    "message",
    "result",
    "class",
    "xmlns",
    "duration",
    "notify",
    "iq",
    "t",
    "ack",
    "g.us",
    "enc",
    "urn:xmpp:whatsapp:push",
    "presence",
    "config_value",
    "picture",
    "verified_name",
    "config_code",
    "key-index-list",
    "contact",
    "mediatype",
    "routing_info",
    "edge_routing",
    "get",
    "read",
    "urn:xmpp:ping",
    "fallback_hostname",
    "0",
    "chatstate",
    "business_hours_config",
    "unavailable",
    "download_buckets",
    "skmsg",
    "verified_level",
    "composing",
    "handshake",
    "device-list",
    "media",
    "text",
    "fallback_ip4",
    "media_conn",
    "device",
    "creation",
    "location",
    "config",
    "item",
    "fallback_ip6",
    "count",
    "w:profile:picture",
    "image",
    "business",
    "2",
    "hostname",
    "call-creator",
    "display_name",
    "relaylatency",
    "platform",
    "abprops",
    "success",
    "msg",
    "offline_preview",
    "prop",
    "key-index",
    "v",
    "day_of_week",
    "pkmsg",
    "version",
    "1",
    "ping",
    "w:p",
    "download",
    "video",
    "set",
    "specific_hours",
    "props",
    "primary",
    "unknown",
    "hash",
    "commerce_experience",
    "last",
    "subscribe",
    "max_buckets",
    "call",
    "profile",
    "member_since_text",
    "close_time",
    "call-id",
    "sticker",
    "mode",
    "participants",
    "value",
    "query",
    "profile_options",
    "open_time",
    "code",
    "list",
    "host",
    "ts",
    "contacts",
    "upload",
    "lid",
    "preview",
    "update",
    "usync",
    "w:stats",
    "delivery",
    "auth_ttl",
    "context",
    "fail",
    "cart_enabled",
    "appdata",
    "category",
    "atn",
    "direct_connection",
    "decrypt-fail",
    "relay_id",
    "mmg-fallback.whatsapp.net",
    "target",
    "available",
    "name",
    "last_id",
    "mmg.whatsapp.net",
    "categories",
    "401",
    "is_new",
    "index",
    "tctoken",
    "ip4",
    "token_id",
    "latency",
    "recipient",
    "edit",
    "ip6",
    "add",
    "thumbnail-document",
    "26",
    "paused",
    "true",
    "identity",
    "stream:error",
    "key",
    "sidelist",
    "background",
    "audio",
    "3",
    "thumbnail-image",
    "biz-cover-photo",
    "cat",
    "gcm",
    "thumbnail-video",
    "error",
    "auth",
    "deny",
    "serial",
    "in",
    "registration",
    "thumbnail-link",
    "remove",
    "00",
    "gif",
    "thumbnail-gif",
    "tag",
    "capability",
    "multicast",
    "item-not-found",
    "description",
    "business_hours",
    "config_expo_key",
    "md-app-state",
    "expiration",
    "fallback",
    "ttl",
    "300",
    "md-msg-hist",
    "device_orientation",
    "out",
    "w:m",
    "open_24h",
    "side_list",
    "token",
    "inactive",
    "01",
    "document",
    "te2",
    "played",
    "encrypt",
    "msgr",
    "hide",
    "direct_path",
    "12",
    "state",
    "not-authorized",
    "url",
    "terminate",
    "signature",
    "status-revoke-delay",
    "02",
    "te",
    "linked_accounts",
    "trusted_contact",
    "timezone",
    "ptt",
    "kyc-id",
    "privacy_token",
    "readreceipts",
    "appointment_only",
    "address",
    "expected_ts",
    "privacy",
    "7",
    "android",
    "interactive",
    "device-identity",
    "enabled",
    "attribute_padding",
    "1080",
    "03",
    "screen_height",
];

static DOUBLE_BYTE_TOKENS: &[&[&str]] = &[
    &[
        "read-self",
        "active",
        "fbns",
        "protocol",
        "reaction",
        "screen_width",
        "heartbeat",
        "deviceid",
        "2:47DEQpj8",
        "uploadfieldstat",
        "voip_settings",
        "retry",
        "priority",
        "longitude",
        "conflict",
        "false",
        "ig_professional",
        "replaced",
        "preaccept",
        "cover_photo",
        "uncompressed",
        "encopt",
        "ppic",
        "04",
        "passive",
        "status-revoke-drop",
        "keygen",
        "540",
        "offer",
        "rate",
        "opus",
        "latitude",
        "w:gp2",
        "ver",
        "4",
        "business_profile",
        "medium",
        "sender",
        "prev_v_id",
        "email",
        "website",
        "invited",
        "sign_credential",
        "05",
        "transport",
        "skey",
        "reason",
        "peer_abtest_bucket",
        "America/Sao_Paulo",
        "appid",
        "refresh",
        "100",
        "06",
        "404",
        "101",
        "104",
        "107",
        "102",
        "109",
        "103",
        "member_add_mode",
        "105",
        "transaction-id",
        "110",
        "106",
        "outgoing",
        "108",
        "111",
        "tokens",
        "followers",
        "ig_handle",
        "self_pid",
        "tue",
        "dec",
        "thu",
        "joinable",
        "peer_pid",
        "mon",
        "features",
        "wed",
        "peer_device_presence",
        "pn",
        "delete",
        "07",
        "fri",
        "audio_duration",
        "admin",
        "connected",
        "delta",
        "rcat",
        "disable",
        "collection",
        "08",
        "480",
        "sat",
        "phash",
        "all",
        "invite",
        "accept",
        "critical_unblock_low",
        "group_update",
        "signed_credential",
        "blinded_credential",
        "eph_setting",
        "net",
        "09",
        "background_location",
        "refresh_id",
        "Asia/Kolkata",
        "privacy_mode_ts",
        "account_sync",
        "voip_payload_type",
        "service_areas",
        "acs_public_key",
        "v_id",
        "0a",
        "fallback_class",
        "relay",
        "actual_actors",
        "metadata",
        "w:biz",
        "5",
        "connected-limit",
        "notice",
        "0b",
        "host_storage",
        "fb_page",
        "subject",
        "privatestats",
        "invis",
        "groupadd",
        "010",
        "note.m4r",
        "uuid",
        "0c",
        "8000",
        "sun",
        "372",
        "1020",
        "stage",
        "1200",
        "720",
        "canonical",
        "fb",
        "011",
        "video_duration",
        "0d",
        "1140",
        "superadmin",
        "012",
        "Opening.m4r",
        "keystore_attestation",
        "dleq_proof",
        "013",
        "timestamp",
        "ab_key",
        "w:sync:app:state",
        "0e",
        "vertical",
        "600",
        "p_v_id",
        "6",
        "likes",
        "014",
        "500",
        "1260",
        "creator",
        "0f",
        "rte",
        "destination",
        "group",
        "group_info",
        "syncd_anti_tampering_fatal_exception_enabled",
        "015",
        "dl_bw",
        "Asia/Jakarta",
        "vp8/h.264",
        "online",
        "1320",
        "fb:multiway",
        "10",
        "timeout",
        "016",
        "nse_retry",
        "urn:xmpp:whatsapp:dirty",
        "017",
        "a_v_id",
        "web_shops_chat_header_button_enabled",
        "nse_call",
        "inactive-upgrade",
        "none",
        "web",
        "groups",
        "2250",
        "mms_hot_content_timespan_in_seconds",
        "contact_blacklist",
        "nse_read",
        "suspended_group_deletion_notification",
        "binary_version",
        "018",
        "https://www.whatsapp.com/otp/copy/",
        "reg_push",
        "shops_hide_catalog_attachment_entrypoint",
        "server_sync",
        ".",
        "ephemeral_messages_allowed_values",
        "019",
        "mms_vcache_aggregation_enabled",
        "iphone",
        "America/Argentina/Buenos_Aires",
        "01a",
        "mms_vcard_autodownload_size_kb",
        "nse_ver",
        "shops_header_dropdown_menu_item",
        "dhash",
        "catalog_status",
        "communities_mvp_new_iqs_serverprop",
        "blocklist",
        "default",
        "11",
        "ephemeral_messages_enabled",
        "01b",
        "original_dimensions",
        "8",
        "mms4_media_retry_notification_encryption_enabled",
        "mms4_server_error_receipt_encryption_enabled",
        "original_image_url",
        "sync",
        "multiway",
        "420",
        "companion_enc_static",
        "shops_profile_drawer_entrypoint",
        "01c",
        "vcard_as_document_size_kb",
        "status_video_max_duration",
        "request_image_url",
        "01d",
        "regular_high",
        "s_t",
        "abt",
        "share_ext_min_preliminary_image_quality",
        "01e",
        "32",
        "syncd_key_rotation_enabled",
        "data_namespace",
        "md_downgrade_read_receipts2",
        "patch",
        "polltype",
        "ephemeral_messages_setting",
        "userrate",
        "15",
        "partial_pjpeg_bw_threshold",
        "played-self",
        "catalog_exists",
        "01f",
        "mute_v2",
    ],
    &[
        "reject",
        "dirty",
        "announcement",
        "020",
        "13",
        "9",
        "status_video_max_bitrate",
        "fb:thrift_iq",
        "offline_batch",
        "022",
        "full",
        "ctwa_first_business_reply_logging",
        "h.264",
        "smax_id",
        "group_description_length",
        "https://www.whatsapp.com/otp/code",
        "status_image_max_edge",
        "smb_upsell_business_profile_enabled",
        "021",
        "web_upgrade_to_md_modal",
        "14",
        "023",
        "s_o",
        "smaller_video_thumbs_status_enabled",
        "media_max_autodownload",
        "960",
        "blocking_status",
        "peer_msg",
        "joinable_group_call_client_version",
        "group_call_video_maximization_enabled",
        "return_snapshot",
        "high",
        "America/Mexico_City",
        "entry_point_block_logging_enabled",
        "pop",
        "024",
        "1050",
        "16",
        "1380",
        "one_tap_calling_in_group_chat_size",
        "regular_low",
        "inline_joinable_education_enabled",
        "hq_image_max_edge",
        "locked",
        "America/Bogota",
        "smb_biztools_deeplink_enabled",
        "status_image_quality",
        "1088",
        "025",
        "payments_upi_intent_transaction_limit",
        "voip",
        "w:g2",
        "027",
        "md_pin_chat_enabled",
        "026",
        "multi_scan_pjpeg_download_enabled",
        "shops_product_grid",
        "transaction_id",
    ],
    &[
        "ctwa_context_enabled",
        "20",
        "fna",
        "hq_image_quality",
        "alt_jpeg_doc_detection_quality",
        "group_call_max_participants",
        "pkey",
        "America/Belem",
        "image_max_kbytes",
        "web_cart_v1_1_order_message_changes_enabled",
        "ctwa_context_enterprise_enabled",
        "urn:xmpp:whatsapp:account",
        "840",
        "Asia/Kuala_Lumpur",
        "max_participants",
        "video_remux_after_repair_enabled",
        "stella_addressbook_restriction_type",
        "660",
        "900",
        "780",
        "context_menu_ios13_enabled",
        "mute-state",
        "ref",
        "payments_request_messages",
        "029",
        "frskmsg",
        "vcard_max_size_kb",
        "sample_buffer_gif_player_enabled",
        "match_last_seen",
        "510",
        "4983",
        "video_max_bitrate",
        "028",
        "w:comms:chat",
        "17",
        "frequently_forwarded_max",
        "groups_privacy_blacklist",
        "Asia/Karachi",
        "02a",
        "web_download_document_thumb_mms_enabled",
        "02b",
        "hist_sync",
        "biz_block_reasons_version",
        "1024",
        "18",
        "web_is_direct_connection_for_plm_transparent",
        "view_once_write",
        "file_max_size",
        "paid_convo_id",
        "online_privacy_setting",
        "video_max_edge",
        "view_once_read",
        "enhanced_storage_management",
        "multi_scan_pjpeg_encoding_enabled",
        "ctwa_context_forward_enabled",
        "video_transcode_downgrade_enable",
        "template_doc_mime_types",
        "hq_image_bw_threshold",
        "30",
        "body",
    ],
    &[
        "stream:features",
        "regular",
        "1724",
        "profile_picture",
    ],
];

fn single_byte_map() -> &'static HashMap<&'static str, u8> {
    static MAP: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for (i, token) in SINGLE_BYTE_TOKENS.iter().enumerate() {
            if !token.is_empty() {
                m.insert(*token, i as u8);
            }
        }
        m
    })
}

fn double_byte_map() -> &'static HashMap<&'static str, (u8, u8)> {
    static MAP: OnceLock<HashMap<&'static str, (u8, u8)>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for (dict, tokens) in DOUBLE_BYTE_TOKENS.iter().enumerate() {
            for (i, token) in tokens.iter().enumerate() {
                m.insert(*token, (dict as u8, i as u8));
            }
        }
        m
    })
}

pub fn index_of_single_token(token: &str) -> Option<u8> {
    single_byte_map().get(token).copied()
}

pub fn index_of_double_byte_token(token: &str) -> Option<(u8, u8)> {
    double_byte_map().get(token).copied()
}

pub fn get_single_token(index: u8) -> Option<&'static str> {
    SINGLE_BYTE_TOKENS.get(index as usize).copied()
}

pub fn get_double_token(dict: u8, index: u8) -> Option<&'static str> {
    DOUBLE_BYTE_TOKENS
        .get(dict as usize)
        .and_then(|d| d.get(index as usize))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_tokens() {
        assert_eq!(index_of_single_token("s.whatsapp.net"), Some(3));
        assert_eq!(index_of_single_token("iq"), Some(25));
        assert_eq!(index_of_single_token("ping"), Some(86));
        assert_eq!(index_of_single_token("w:p"), Some(87));
        assert_eq!(get_single_token(19), Some("message"));
        assert_eq!(get_single_token(28), Some("g.us"));
    }

    #[test]
    fn test_single_byte_roundtrip() {
        for (i, token) in SINGLE_BYTE_TOKENS.iter().enumerate() {
            if !token.is_empty() {
                assert_eq!(
                    index_of_single_token(token),
                    Some(i as u8),
                    "token '{token}' at index {i} does not round-trip"
                );
            }
        }
    }

    #[test]
    fn test_double_byte_roundtrip() {
        for dict in 0..DOUBLE_BYTE_TOKENS.len() as u8 {
            for idx in 0..=255u8 {
                if let Some(token) = get_double_token(dict, idx) {
                    assert_eq!(index_of_double_byte_token(token), Some((dict, idx)));
                }
            }
        }
    }

    #[test]
    fn test_unknown_string() {
        assert!(index_of_single_token("definitely-not-a-token").is_none());
        assert!(index_of_double_byte_token("definitely-not-a-token").is_none());
    }

    #[test]
    fn test_special_tags_are_not_tokens() {
        for special in [
            AD_JID, LIST_8, LIST_16, JID_PAIR, HEX_8, BINARY_8, BINARY_20, BINARY_32, NIBBLE_8,
        ] {
            assert!(get_single_token(special).is_none());
        }
    }
}
