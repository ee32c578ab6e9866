use std::collections::HashSet;
use std::time::{Duration, Instant};

use rusty_relay::blacklist::{Blacklist, BlockRule, IpBlacklist};
use rusty_relay::config::ServerConfig;
use rusty_relay::console::Command;
use rusty_relay::constants::{LINK_LENGTH, LINK_PREFIX};
use rusty_relay::core::link::{generate_link, is_well_formed};
use rusty_relay::core::{FrameworkMessage, Packet, RateKeeper};
use rusty_relay::error::RustyRelayError;

#[test]
fn test_links_are_well_formed_and_distinct() {
    let links: HashSet<String> = (0..500).map(|_| generate_link()).collect();
    assert_eq!(links.len(), 500);
    for link in &links {
        assert_eq!(link.len(), LINK_LENGTH);
        assert!(link.starts_with(LINK_PREFIX));
        assert!(is_well_formed(link));
    }

    assert!(!is_well_formed("CLaJ"));
    assert!(!is_well_formed(&format!("XXXX{}", &generate_link()[4..])));
    assert!(!is_well_formed(&format!("{}1", &generate_link()[..LINK_LENGTH - 1])));
}

#[test]
fn test_rate_keeper_window() {
    let window = Duration::from_millis(3000);
    let start = Instant::now();
    let mut keeper = RateKeeper::new();

    for _ in 0..500 {
        assert!(keeper.allow_at(start, window, 500));
    }
    assert!(!keeper.allow_at(start, window, 500));

    // a new window starts once the previous one has fully elapsed
    let later = start + Duration::from_millis(3001);
    assert!(keeper.allow_at(later, window, 500));
    assert_eq!(keeper.occurrences(), 1);
}

#[test]
fn test_codec_wire_layout() {
    let link = Packet::Link("new".to_string()).to_bytes().unwrap();
    assert_eq!(link, vec![0xFD, 0, 3, b'n', b'e', b'w']);

    let ping = Packet::Framework(FrameworkMessage::Ping {
        id: 7,
        is_reply: true,
    })
    .to_bytes()
    .unwrap();
    assert_eq!(ping, vec![0xFE, 0, 0, 0, 0, 7, 1]);

    let register = Packet::Framework(FrameworkMessage::RegisterTcp { connection_id: 258 })
        .to_bytes()
        .unwrap();
    assert_eq!(register, vec![0xFE, 4, 0, 0, 1, 2]);

    let keep_alive = Packet::Framework(FrameworkMessage::KeepAlive)
        .to_bytes()
        .unwrap();
    assert_eq!(keep_alive, vec![0xFE, 2]);
}

#[test]
fn test_raw_frames_are_opaque() {
    let frame = vec![0x01, 0xFE, 0xFD, 0x00, 0x42];
    let packet = Packet::decode(&frame).unwrap();
    assert_eq!(packet, Packet::Raw(frame.clone()));
    assert!(!matches!(packet, Packet::Framework(_)));
    assert_eq!(packet.to_bytes().unwrap(), frame);
}

#[test]
fn test_decode_control_and_framework() {
    assert_eq!(
        Packet::decode(&[0xFD, 0, 4, b'h', b'o', b's', b't']).unwrap(),
        Packet::Link("host".to_string())
    );
    assert_eq!(
        Packet::decode(&[0xFE, 1]).unwrap(),
        Packet::Framework(FrameworkMessage::DiscoverHost)
    );
    assert!(matches!(
        Packet::decode(&[0xFE, 2]).unwrap(),
        Packet::Framework(_)
    ));
}

#[test]
fn test_decode_rejects_corrupted_frames() {
    assert!(matches!(
        Packet::decode(&[0xFE, 9]),
        Err(RustyRelayError::UnknownFrameworkMessage(9))
    ));
    // declared string length runs past the frame
    assert!(Packet::decode(&[0xFD, 0, 10, b'a']).is_err());
    // ping without its reply flag
    assert!(Packet::decode(&[0xFE, 0, 0, 0, 0, 1]).is_err());
}

#[test]
fn test_block_rules() {
    let rule = BlockRule::parse("20.0.0.0/8").unwrap();
    assert!(rule.matches("20.1.2.3".parse().unwrap()));
    assert!(!rule.matches("21.0.0.1".parse().unwrap()));
    assert!(BlockRule::parse("not an ip").is_err());
}

#[tokio::test]
async fn test_blacklist_ban_and_unban() {
    let blacklist = IpBlacklist::new(None);
    blacklist.add("203.0.113.9").await.unwrap();
    assert!(blacklist.contains("203.0.113.9".parse().unwrap()).await);
    // IPv4-mapped addresses match their IPv4 rule
    assert!(blacklist.contains("::ffff:203.0.113.9".parse().unwrap()).await);

    assert!(blacklist.remove("203.0.113.9").await);
    assert!(!blacklist.remove("203.0.113.9").await);
    assert_eq!(blacklist.len().await, 0);

    // no feed configured: nothing to fetch
    assert_eq!(blacklist.refresh().await.unwrap(), 0);
}

#[test]
fn test_default_config_is_valid() {
    let config = ServerConfig::default();
    assert_eq!(config.port, 8000);
    assert_eq!(config.spam_limit, 500);
    assert_eq!(config.spam_window, Duration::from_millis(3000));
    assert_eq!(config.write_buffer_size, 32_768);
    assert!(config.validate().is_ok());

    let broken = ServerConfig {
        spam_limit: 0,
        ..ServerConfig::default()
    };
    assert!(matches!(broken.validate(), Err(RustyRelayError::ConfigError(_))));
}

#[test]
fn test_console_parsing() {
    assert_eq!(Command::parse("exit").unwrap(), Some(Command::Exit));
    assert_eq!(Command::parse("refresh").unwrap(), Some(Command::Refresh));
    assert_eq!(
        Command::parse("unban 10.0.0.0/8").unwrap(),
        Some(Command::Unban("10.0.0.0/8".to_string()))
    );
    assert_eq!(
        Command::parse("lst").unwrap_err().to_string(),
        "Command not found. Did you mean list?"
    );
}
