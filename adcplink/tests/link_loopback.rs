//! Command/response behaviour against a simulated instrument.

use adcplink::channel::LoopbackChannel;
use adcplink::protocol::commands::BANNER;
use adcplink::{CommandPort, EchoRule, Link, LinkConfig, ReaderState, ReceiveMode};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn config() -> LinkConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    LinkConfig::default()
        .with_wait_state(Duration::from_millis(10))
        .with_command_timeout(Duration::from_millis(300))
}

/// Longer settle time so the reader reliably sees the break reply.
fn break_config() -> LinkConfig {
    config().with_wait_state(Duration::from_millis(100))
}

fn banner_reply() -> Vec<u8> {
    format!("\r\n{BANNER}\r\nADCP firmware 0.0.2.76\r\n").into_bytes()
}

fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn echo_confirms_command() {
    let link = Link::connect(LoopbackChannel::echoing(), config()).unwrap();
    assert!(link.send_and_wait("CEPO", Duration::from_millis(500)).unwrap());
}

#[test]
fn since_last_command_starts_at_latest_send() {
    let link = Link::connect(LoopbackChannel::echoing(), config()).unwrap();
    assert!(link.send_and_wait("CEPO", Duration::from_millis(500)).unwrap());
    assert!(link.send_and_wait("CWPP 1", Duration::from_millis(500)).unwrap());

    assert_eq!(link.since_last_command(), b"CWPP 1\r");
    assert!(link.buffer_text().starts_with("CEPO\r"));
}

#[test]
fn echo_is_case_insensitive() {
    let channel = LoopbackChannel::new(|data: &[u8]| data.to_ascii_lowercase());
    let link = Link::connect(channel, config()).unwrap();
    assert!(link.send_and_wait("CWPBB 1", Duration::from_millis(500)).unwrap());
}

#[test]
fn silence_fails_after_timeout() {
    let link = Link::connect(LoopbackChannel::silent(), config()).unwrap();
    let timeout = Duration::from_millis(200);

    let start = Instant::now();
    assert!(!link.send_and_wait("START", timeout).unwrap());
    assert!(start.elapsed() >= timeout);
}

#[test]
fn mismatched_reply_fails() {
    let channel = LoopbackChannel::new(|_: &[u8]| b"ERR\r".to_vec());
    let link = Link::connect(channel, config()).unwrap();
    assert!(!link.send_and_wait("CWPP 1", Duration::from_millis(200)).unwrap());
}

#[test]
fn ack_rule_accepts_ack_byte() {
    let channel = LoopbackChannel::new(|_: &[u8]| vec![0x06]);
    let link = Link::connect(channel, config().with_echo_rule(EchoRule::Ack)).unwrap();
    assert!(link.send_and_wait("STOP", Duration::from_millis(500)).unwrap());
}

#[test]
fn ack_byte_alone_is_not_an_echo() {
    let channel = LoopbackChannel::new(|_: &[u8]| vec![0x06]);
    let link = Link::connect(channel, config()).unwrap();
    assert!(!link.send_and_wait("STOP", Duration::from_millis(200)).unwrap());
}

#[test]
fn textual_break_needs_banner() {
    let channel = LoopbackChannel::new(|data: &[u8]| {
        if data == b"BREAK\r" {
            let mut reply = data.to_vec();
            reply.extend(banner_reply());
            reply
        } else {
            Vec::new()
        }
    });
    let link = Link::connect(channel, config()).unwrap();
    assert!(link.send_break().unwrap());

    // An echo of BREAK without the banner is not enough.
    let link = Link::connect(LoopbackChannel::echoing(), config()).unwrap();
    assert!(!link.send_break().unwrap());
}

#[test]
fn hardware_break_with_reply_skips_textual_break() {
    let channel = LoopbackChannel::silent().with_break_reply(banner_reply());
    let handle = channel.handle();
    let link = Link::connect(channel, break_config()).unwrap();

    assert!(link.send_break().unwrap());
    assert_eq!(handle.break_count(), 1);
    assert!(handle.written().is_empty());
    assert!(link.buffer_text().contains(BANNER));
}

#[test]
fn hardware_break_without_reply_falls_back() {
    let channel = LoopbackChannel::new(|data: &[u8]| {
        if data == b"BREAK\r" {
            banner_reply()
        } else {
            Vec::new()
        }
    })
    .with_break_reply(Vec::new());
    let handle = channel.handle();
    let link = Link::connect(channel, break_config()).unwrap();

    assert!(link.send_break().unwrap());
    assert_eq!(handle.break_count(), 1);
    assert_eq!(handle.written_text(), "BREAK\r");
}

#[test]
fn composite_commands_retry_once() {
    let attempts = Arc::new(Mutex::new(0));
    let seen = Arc::clone(&attempts);
    let channel = LoopbackChannel::new(move |data: &[u8]| {
        let mut n = seen.lock().unwrap();
        *n += 1;
        // Ignore the first attempt.
        if *n == 1 { Vec::new() } else { data.to_vec() }
    });
    let handle = channel.handle();
    let mut link = Link::connect(channel, config()).unwrap();

    assert!(link.start_pinging().unwrap());
    assert_eq!(handle.written_text(), "START\rSTART\r");
}

#[test]
fn composite_commands_give_up_after_two() {
    let channel = LoopbackChannel::silent();
    let handle = channel.handle();
    let mut link = Link::connect(channel, config()).unwrap();

    assert!(!link.stop_pinging().unwrap());
    assert_eq!(handle.written_text(), "STOP\rSTOP\r");
}

#[test]
fn set_time_sends_stime() {
    let channel = LoopbackChannel::echoing();
    let handle = channel.handle();
    let mut link = Link::connect(channel, config()).unwrap();

    assert!(link.set_time().unwrap());
    let written = handle.written_text();
    assert!(written.starts_with("STIME "));
    // STIME yyyy/MM/dd,HH:mm:ss\r
    assert_eq!(written.len(), "STIME 2024/01/01,00:00:00\r".len());
}

#[test]
fn directory_listing_collects_until_used_space() {
    let channel = LoopbackChannel::new(|data: &[u8]| {
        if data == b"DSDIR\r" {
            b"DSDIR\r\nA0000001.ENS  2048\r\nA0000002.ENS  1024\r\nUsed Space: 3 KB\r\n".to_vec()
        } else {
            Vec::new()
        }
    });
    let mut link = Link::connect(channel, config()).unwrap();

    let listing = link
        .directory_listing(Duration::from_secs(1))
        .unwrap()
        .expect("complete listing");
    assert!(listing.contains("A0000002.ENS"));
}

#[test]
fn read_failure_closes_channel() {
    let channel = LoopbackChannel::echoing();
    let handle = channel.handle();
    let link = Link::connect(channel, config()).unwrap();

    handle.fail_next_read();
    assert!(wait_until(|| !link.is_open()));
    // The reader keeps running; commands now fail instead of erroring.
    assert_eq!(link.reader_state(), ReaderState::Polling);
    assert!(!link.send_and_wait("START", Duration::from_millis(50)).unwrap());
}

#[test]
fn subscribers_see_raw_and_text() {
    let channel = LoopbackChannel::silent();
    let handle = channel.handle();
    let link = Link::connect(channel, config()).unwrap();
    let raw = link.subscribe_raw();
    let text = link.subscribe_text();

    handle.push("temp 12.5\u{b0}C\r".as_bytes());
    let bytes = raw.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(bytes, "temp 12.5\u{b0}C\r".as_bytes());
    assert_eq!(text.recv_timeout(Duration::from_secs(1)).unwrap(), "temp 12.5\u{b0}C\r");
}

#[test]
fn handlers_follow_receive_mode() {
    let channel = LoopbackChannel::silent();
    let handle = channel.handle();
    let link = Link::connect(channel, config()).unwrap();

    let gps = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&gps);
    link.set_handler(ReceiveMode::Gps, move |d: &[u8]| {
        sink.lock().unwrap().extend_from_slice(d);
    });

    handle.push(b"ignored");
    assert!(wait_until(|| link.buffer_text() == "ignored"));
    assert!(gps.lock().unwrap().is_empty());

    link.set_mode(ReceiveMode::Gps);
    handle.push(b"$GPGGA,");
    assert!(wait_until(|| gps.lock().unwrap().as_slice() == b"$GPGGA,"));
}

#[test]
fn buffer_keeps_newest_bytes() {
    let channel = LoopbackChannel::silent();
    let handle = channel.handle();
    let config = LinkConfig {
        buffer_capacity: Some(8),
        ..config()
    };
    let link = Link::connect(channel, config).unwrap();

    handle.push(b"0123456789ABCDEF");
    assert!(wait_until(|| link.buffer_text() == "89ABCDEF"));
}
