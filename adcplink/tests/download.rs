//! Bulk download through scripted chunk sources and a simulated link.

use adcplink::channel::LoopbackChannel;
use adcplink::download::{
    CancelToken, Chunk, ChunkSource, DownloadConfig, DownloadEngine, DownloadEvent, DownloadSession,
    DownloadStatus, LinkChunkSource, download_to_file,
};
use adcplink::{Link, LinkConfig, Result};
use std::collections::VecDeque;
use std::time::Duration;

/// Source serving fixed chunks, then empty polls.
struct FileSource {
    chunks: VecDeque<Vec<u8>>,
    served: usize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl FileSource {
    fn new(chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            served: 0,
            cancel_after: None,
        }
    }
}

impl ChunkSource for FileSource {
    fn clear(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn request_file(&mut self, _file: &str) -> Result<bool> {
        Ok(true)
    }

    fn next_chunk(&mut self) -> Result<Chunk> {
        if let Some((after, ref token)) = self.cancel_after {
            if self.served == after {
                token.cancel();
            }
        }
        match self.chunks.pop_front() {
            Some(data) => {
                self.served += 1;
                Ok(Chunk::Data(data))
            },
            None => Ok(Chunk::Empty),
        }
    }

    fn resend(&mut self) -> Result<Chunk> {
        self.next_chunk()
    }
}

fn config() -> DownloadConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    DownloadConfig {
        clear_retry_delay: Duration::from_millis(1),
        ..DownloadConfig::default()
    }
}

#[test]
fn total_bytes_is_sum_of_chunks() {
    let mut source = FileSource::new(&[&[1; 1024], &[2; 1024], &[3; 17]]);
    let outcome = DownloadEngine::with_config(&mut source, config())
        .run(DownloadSession::new("A0000001.ENS", Vec::new()))
        .unwrap();

    assert_eq!(outcome.report.status, DownloadStatus::Completed);
    assert_eq!(outcome.report.bytes, 2065);
    assert_eq!(outcome.report.chunks, 3);
    assert_eq!(outcome.sink.len(), 2065);
    assert_eq!(outcome.sink[2048], 3);
}

#[test]
fn cancellation_after_three_chunks() {
    let token = CancelToken::new();
    let mut source = FileSource::new(&[b"one", b"two", b"three", b"four", b"five"]);
    source.cancel_after = Some((3, token.clone()));

    let mut engine = DownloadEngine::with_config(&mut source, config());
    let events = engine.subscribe();
    let outcome = engine
        .run(DownloadSession::new("f", Vec::new()).with_cancel(token))
        .unwrap();

    assert_eq!(outcome.report.status, DownloadStatus::Cancelled);
    assert_eq!(outcome.sink, b"onetwothree");
    assert_eq!(outcome.report.chunks, 3);

    let events = events.drain();
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Complete { success: false, .. })
    ));
}

#[test]
fn download_to_file_writes_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("A0000007.ENS");
    let mut source = FileSource::new(&[b"\x80\x80\x80\x80", b"ensemble"]);

    let report =
        download_to_file(&mut source, "A0000007.ENS", &path, config(), CancelToken::new()).unwrap();

    assert!(report.is_success());
    assert_eq!(std::fs::read(&path).unwrap(), b"\x80\x80\x80\x80ensemble");
}

#[test]
fn streaming_link_download() {
    let payload: Vec<u8> = (0u8..=255).cycle().skip(0x80).take(3000).collect();
    let first = payload[..1000].to_vec();
    let rest = payload[1000..].to_vec();

    let channel = LoopbackChannel::new(move |data: &[u8]| {
        if data == b"clear\r" {
            data.to_vec()
        } else if data == b"download A0000003.ENS\r" {
            let mut reply = data.to_vec();
            reply.extend_from_slice(&first);
            reply
        } else {
            Vec::new()
        }
    });
    let handle = channel.handle();
    let config = LinkConfig {
        download_wait_state: Duration::from_millis(5),
        ..LinkConfig::default().with_wait_state(Duration::from_millis(10))
    };
    let link = Link::connect(channel, config).unwrap();

    let feeder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        for piece in rest.chunks(500) {
            handle.push(piece);
            std::thread::sleep(Duration::from_millis(20));
        }
    });

    let mut source = LinkChunkSource::new(&link);
    let outcome = DownloadEngine::new(&mut source)
        .run(DownloadSession::new("A0000003.ENS", Vec::new()))
        .unwrap();
    feeder.join().unwrap();

    assert_eq!(outcome.report.status, DownloadStatus::Completed);
    assert_eq!(outcome.sink, payload);
}

#[test]
fn streaming_download_keeps_leading_line_endings() {
    let channel = LoopbackChannel::new(|data: &[u8]| {
        if data == b"clear\r" {
            data.to_vec()
        } else if data == b"download F.TXT\r" {
            let mut reply = data.to_vec();
            reply.extend_from_slice(b"\r\n\nHELLO");
            reply
        } else {
            Vec::new()
        }
    })
    .with_name("crlf-instrument");
    let config = LinkConfig {
        download_wait_state: Duration::from_millis(5),
        ..LinkConfig::default().with_wait_state(Duration::from_millis(10))
    };
    let link = Link::connect(channel, config).unwrap();
    assert_eq!(link.name(), "crlf-instrument");

    let mut source = LinkChunkSource::new(&link);
    let outcome = DownloadEngine::new(&mut source)
        .run(DownloadSession::new("F.TXT", Vec::new()))
        .unwrap();

    assert_eq!(outcome.report.status, DownloadStatus::Completed);
    assert_eq!(outcome.sink, b"\r\n\nHELLO");
    assert_eq!(outcome.report.bytes, 8);
}
