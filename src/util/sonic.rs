//! Client for the Sonic channel protocol: line based, `\r\n` terminated,
//! one channel per TCP connection, each started in `ingest` or `search` mode.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::search_backend::SearchBackend;
use crate::error::{Error, Result};

/// Used when the server does not announce `buffer(N)` in its STARTED reply.
const DEFAULT_BUFFER: usize = 20_000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ingest,
    Search,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Ingest => "ingest",
            Mode::Search => "search",
        }
    }
}

struct Channel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buffer: usize,
    timeout: Duration,
}

impl Channel {
    async fn open(addr: &str, password: &str, mode: Mode, wait: Duration) -> Result<Self> {
        let stream = timeout(wait, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::BackendUnavailable(format!("{addr}: connect timed out after {wait:?}")))?
            .map_err(|e| Error::BackendUnavailable(format!("{addr}: {e}")))?;
        let (reader, writer) = stream.into_split();
        let mut channel = Channel {
            reader: BufReader::new(reader),
            writer,
            buffer: DEFAULT_BUFFER,
            timeout: wait,
        };

        let greeting = channel.read_line().await?;
        if !greeting.starts_with("CONNECTED") {
            return Err(Error::Protocol(format!("unexpected greeting {greeting:?}")));
        }
        let started = channel
            .request(&format!("START {} {}", mode.as_str(), password))
            .await?;
        if !started.starts_with("STARTED") {
            return Err(Error::Protocol(format!("unexpected reply to START: {started:?}")));
        }
        if let Some(buffer) = parse_buffer(&started) {
            channel.buffer = buffer;
        }
        debug!(addr, mode = mode.as_str(), buffer = channel.buffer, "sonic channel started");
        Ok(channel)
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        let framed = format!("{line}\r\n");
        self.writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))
    }

    /// Next reply line. `ERR` replies surface as errors.
    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| Error::BackendUnavailable(format!("no reply within {:?}", self.timeout)))?
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;
        if n == 0 {
            return Err(Error::BackendUnavailable("connection closed by server".into()));
        }
        let line = line.trim_end().to_string();
        if let Some(reason) = line.strip_prefix("ERR ") {
            return Err(Error::BackendUnavailable(reason.to_string()));
        }
        Ok(line)
    }

    async fn request(&mut self, line: &str) -> Result<String> {
        self.send(line).await?;
        self.read_line().await
    }

    async fn push(&mut self, collection: &str, bucket: &str, key: &str, text: &str) -> Result<()> {
        let overhead = format!("PUSH {collection} {bucket} {key} \"\"").len();
        let limit = self.buffer.saturating_sub(overhead).max(1);
        for chunk in chunk_text(text, limit) {
            let reply = self
                .request(&format!("PUSH {collection} {bucket} {key} \"{chunk}\""))
                .await?;
            if reply != "OK" {
                return Err(Error::Protocol(format!("unexpected reply to PUSH: {reply:?}")));
            }
        }
        Ok(())
    }

    async fn flush_object(&mut self, collection: &str, bucket: &str, key: &str) -> Result<u64> {
        let reply = self
            .request(&format!("FLUSHO {collection} {bucket} {key}"))
            .await?;
        reply
            .strip_prefix("RESULT ")
            .and_then(|n| n.trim().parse().ok())
            .ok_or_else(|| Error::Protocol(format!("unexpected reply to FLUSHO: {reply:?}")))
    }

    async fn query(
        &mut self,
        collection: &str,
        bucket: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let terms = chunk_text(text, usize::MAX).join(" ");
        let reply = self
            .request(&format!("QUERY {collection} {bucket} \"{terms}\" LIMIT({limit})"))
            .await?;
        let id = reply
            .strip_prefix("PENDING ")
            .map(str::trim)
            .ok_or_else(|| Error::Protocol(format!("unexpected reply to QUERY: {reply:?}")))?
            .to_string();
        loop {
            let line = self.read_line().await?;
            let mut parts = line.split_whitespace();
            if parts.next() == Some("EVENT") && parts.next() == Some("QUERY") && parts.next() == Some(id.as_str()) {
                return Ok(parts.map(str::to_string).collect());
            }
            debug!(line = %line, "ignoring unrelated sonic event");
        }
    }

    async fn quit(&mut self) -> Result<()> {
        let reply = self.request("QUIT").await?;
        if !reply.starts_with("ENDED") {
            return Err(Error::Protocol(format!("unexpected reply to QUIT: {reply:?}")));
        }
        Ok(())
    }
}

/// `STARTED search protocol(1) buffer(20000)` -> `20000`
fn parse_buffer(started: &str) -> Option<usize> {
    started
        .split_whitespace()
        .find_map(|part| part.strip_prefix("buffer(")?.strip_suffix(')')?.parse().ok())
}

fn escape_char(c: char, out: &mut String) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        _ => out.push(c),
    }
}

/// Escape `text` for a quoted protocol argument and split it at whitespace
/// into chunks of at most `limit` bytes. Words longer than the limit are
/// split between characters.
fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut pieces = Vec::new();
        let mut piece = String::new();
        for c in word.chars() {
            let mut escaped = String::new();
            escape_char(c, &mut escaped);
            if !piece.is_empty() && piece.len() + escaped.len() > limit {
                pieces.push(std::mem::take(&mut piece));
            }
            piece.push_str(&escaped);
        }
        pieces.push(piece);

        for piece in pieces {
            if !current.is_empty() && current.len() + 1 + piece.len() > limit {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Sonic-backed search. Keeps `pool_size` ingest channels and one search
/// channel, each opened on first use and dropped after any error so the
/// next call reconnects.
pub struct SonicBackend {
    addr: String,
    password: String,
    ingest: Vec<Mutex<Option<Channel>>>,
    search: Mutex<Option<Channel>>,
    next_ingest: AtomicUsize,
    timeout: Duration,
}

impl SonicBackend {
    pub fn new(host: &str, port: u16, password: &str, pool_size: usize) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            password: password.to_string(),
            ingest: (0..pool_size.max(1)).map(|_| Mutex::new(None)).collect(),
            search: Mutex::new(None),
            next_ingest: AtomicUsize::new(0),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound on connecting and on waiting for each reply line.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn checkout<'a>(
        &self,
        slot: &'a Mutex<Option<Channel>>,
        mode: Mode,
    ) -> Result<MutexGuard<'a, Option<Channel>>> {
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(Channel::open(&self.addr, &self.password, mode, self.timeout).await?);
        }
        Ok(guard)
    }

    fn ingest_slot(&self) -> &Mutex<Option<Channel>> {
        let i = self.next_ingest.fetch_add(1, Ordering::Relaxed) % self.ingest.len();
        &self.ingest[i]
    }
}

fn open_channel<'g>(guard: &'g mut MutexGuard<'_, Option<Channel>>) -> Result<&'g mut Channel> {
    (**guard)
        .as_mut()
        .ok_or_else(|| Error::BackendUnavailable("channel not open".into()))
}

fn reset_on_error<T>(guard: &mut MutexGuard<'_, Option<Channel>>, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        warn!(error = %e, "dropping sonic channel");
        **guard = None;
    }
    result
}

#[async_trait]
impl SearchBackend for SonicBackend {
    fn name(&self) -> &str {
        "sonic"
    }

    async fn push(&self, collection: &str, bucket: &str, key: &str, text: &str) -> Result<()> {
        check_key(key)?;
        let mut guard = self.checkout(self.ingest_slot(), Mode::Ingest).await?;
        let result = open_channel(&mut guard)?.push(collection, bucket, key, text).await;
        reset_on_error(&mut guard, result)
    }

    async fn flush_object(&self, collection: &str, bucket: &str, key: &str) -> Result<u64> {
        check_key(key)?;
        let mut guard = self.checkout(self.ingest_slot(), Mode::Ingest).await?;
        let result = open_channel(&mut guard)?.flush_object(collection, bucket, key).await;
        reset_on_error(&mut guard, result)
    }

    async fn query(
        &self,
        collection: &str,
        bucket: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut guard = self.checkout(&self.search, Mode::Search).await?;
        let result = open_channel(&mut guard)?.query(collection, bucket, text, limit).await;
        reset_on_error(&mut guard, result)
    }

    /// Send QUIT on every open channel.
    async fn close(&self) -> Result<()> {
        for slot in self.ingest.iter().chain(std::iter::once(&self.search)) {
            if let Some(mut channel) = slot.lock().await.take() {
                channel.quit().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    type Pushed = Arc<std::sync::Mutex<Vec<(String, String)>>>;

    /// Minimal in-process Sonic server: password `secret`, buffer(64), and
    /// every query answers with the keys pushed so far.
    async fn fake_server() -> (u16, Pushed) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let pushed: Pushed = Arc::default();
        let shared = pushed.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                let pushed = shared.clone();
                tokio::spawn(async move {
                    let (r, mut w) = stream.into_split();
                    let mut lines = BufReader::new(r).lines();
                    w.write_all(b"CONNECTED <sonic-server v1.4.0>\r\n").await.unwrap();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply = match line.split(' ').next().unwrap_or("") {
                            "START" if line.ends_with(" secret") => {
                                let mode = line.split(' ').nth(1).unwrap_or("");
                                format!("STARTED {mode} protocol(1) buffer(64)\r\n")
                            }
                            "START" => "ERR authentication_failed\r\n".to_string(),
                            "PUSH" => {
                                let parts: Vec<&str> = line.splitn(5, ' ').collect();
                                let text = parts[4].trim_matches('"').to_string();
                                pushed.lock().unwrap().push((parts[3].to_string(), text));
                                "OK\r\n".to_string()
                            }
                            "FLUSHO" => "RESULT 3\r\n".to_string(),
                            "QUERY" => {
                                let mut keys: Vec<String> =
                                    pushed.lock().unwrap().iter().map(|(k, _)| k.clone()).collect();
                                keys.dedup();
                                format!("PENDING q1\r\nEVENT QUERY q1 {}\r\n", keys.join(" "))
                            }
                            "QUIT" => {
                                w.write_all(b"ENDED quit\r\n").await.unwrap();
                                return;
                            }
                            _ => "ERR unknown_command\r\n".to_string(),
                        };
                        w.write_all(reply.as_bytes()).await.unwrap();
                    }
                });
            }
        });
        (port, pushed)
    }

    #[test]
    fn test_parse_buffer() {
        assert_eq!(parse_buffer("STARTED ingest protocol(1) buffer(20000)"), Some(20000));
        assert_eq!(parse_buffer("STARTED ingest protocol(1)"), None);
    }

    #[test]
    fn test_chunk_text_respects_limit_and_escapes() {
        let chunks = chunk_text("alpha beta gamma delta", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
        assert_eq!(chunk_text("say \"hi\"\nnow", 100), vec!["say \\\"hi\\\" now"]);
        let long = chunk_text("abcdefghij", 4);
        assert_eq!(long, vec!["abcd", "efgh", "ij"]);
        assert!(chunk_text("  \n ", 10).is_empty());
    }

    #[tokio::test]
    async fn test_push_flush_query() {
        let (port, pushed) = fake_server().await;
        let backend = SonicBackend::new("127.0.0.1", port, "secret", 2);
        let text: Vec<String> = (0..20).map(|i| format!("word{i}")).collect();
        let text = text.join(" ");

        assert_eq!(backend.flush_object("c", "b", "k1").await.unwrap(), 3);
        backend.push("c", "b", "k1", &text).await.unwrap();

        let recorded = pushed.lock().unwrap().clone();
        assert!(recorded.len() > 1);
        let limit = 64 - "PUSH c b k1 \"\"".len();
        assert!(recorded.iter().all(|(k, chunk)| k == "k1" && chunk.len() <= limit));
        let rejoined: Vec<&str> = recorded.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(rejoined.join(" "), text);

        let keys = backend.query("c", "b", "word3", 10).await.unwrap();
        assert_eq!(keys, vec!["k1"]);
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_password_is_unavailable() {
        let (port, _) = fake_server().await;
        let backend = SonicBackend::new("127.0.0.1", port, "wrong", 1);
        let err = backend.query("c", "b", "x", 10).await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(ref r) if r == "authentication_failed"));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let backend = SonicBackend::new("127.0.0.1", port, "secret", 1);
        let err = backend.push("c", "b", "k", "text").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let backend = SonicBackend::new("127.0.0.1", port, "secret", 1).with_timeout(Duration::from_millis(50));
        let err = backend.query("c", "b", "x", 10).await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(ref r) if r.starts_with("no reply within")));
    }

    #[tokio::test]
    async fn test_key_with_space_rejected() {
        let backend = SonicBackend::new("127.0.0.1", 1, "secret", 1);
        let err = backend.push("c", "b", "bad key", "text").await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }
}
