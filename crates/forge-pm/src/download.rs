//! Resumable, blocking file downloader.
//!
//! The destination file is opened read/write and its current length becomes
//! the resume offset, sent to the server as `Range: bytes=<offset>-`. One
//! level of 301/302 redirect is followed manually so the Range and Basic-Auth
//! headers are reissued on the hop. The body is streamed in ~10 KiB chunks
//! with an observer notified after every chunk; cancellation is cooperative
//! and checked between chunks.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::{CONTENT_LENGTH, LOCATION, RANGE};
use reqwest::StatusCode;
use url::Url;

use crate::http::{userinfo_credentials, HttpConfig};
use crate::{ForgeError, Result};

const CHUNK_SIZE: usize = 10 * 1024;

/// Downloader states, notified to observers on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Connecting,
    Downloading,
    Complete,
    Error,
    Cancelled,
    ConnectTimeout,
}

/// Observer for state transitions and per-chunk progress.
pub trait DownloadObserver {
    fn on_state(&mut self, _state: DownloadState) {}
    fn on_progress(&mut self, _downloaded: u64, _total: Option<u64>, _percent: f32) {}
}

/// Cooperative cancellation signal, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Bytes already present in the destination before the transfer.
    pub initial_size: u64,
    /// Bytes transferred by this call.
    pub downloaded: u64,
    /// Final expected size, when the server declared one.
    pub total: Option<u64>,
}

pub struct FileDownloader {
    config: HttpConfig,
}

impl FileDownloader {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    /// Blocking, resumable fetch of `url` into `dest`.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancelToken,
        mut observer: Option<&mut dyn DownloadObserver>,
    ) -> Result<DownloadSummary> {
        let result = self.download_inner(url, dest, cancel, &mut observer);
        if let Err(ref e) = result {
            let state = match e {
                ForgeError::Cancelled => DownloadState::Cancelled,
                ForgeError::ConnectTimeout { .. } => DownloadState::ConnectTimeout,
                _ => DownloadState::Error,
            };
            notify_state(&mut observer, state);
        }
        result
    }

    fn download_inner(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancelToken,
        observer: &mut Option<&mut dyn DownloadObserver>,
    ) -> Result<DownloadSummary> {
        let parsed = Url::parse(url)
            .map_err(|_| ForgeError::HttpStatus { status: 0, url: url.to_string() })?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dest)?;
        let initial_size = file.seek(SeekFrom::End(0))?;

        notify_state(observer, DownloadState::Connecting);

        let client = self.config.build_client()?;
        let credentials = userinfo_credentials(&parsed);
        let send = |target: &str| -> Result<Response> {
            let mut request: RequestBuilder = client
                .get(target)
                .header(RANGE, format!("bytes={}-", initial_size));
            if let Some((user, password)) = &credentials {
                request = request.basic_auth(user, password.as_deref());
            }
            request.send().map_err(|e| {
                if e.is_timeout() {
                    ForgeError::ConnectTimeout { url: target.to_string() }
                } else {
                    ForgeError::Network(e)
                }
            })
        };

        let mut response = send(parsed.as_str())?;

        // A single redirect hop is followed, reissuing Range and auth.
        if matches!(
            response.status(),
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
        ) {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| ForgeError::HttpStatus {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                })?;
            log::debug!("following redirect to {}", location);
            let target = parsed
                .join(&location)
                .map_err(|_| ForgeError::HttpStatus {
                    status: response.status().as_u16(),
                    url: location.clone(),
                })?;
            response = send(target.as_str())?;
        }

        let status = response.status();
        let mut downloaded: u64 = 0;
        let mut offset = initial_size;
        match status {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => {
                // Server ignored the Range request; start over.
                if initial_size > 0 {
                    log::debug!("server ignored Range header, restarting {}", url);
                }
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                offset = 0;
            }
            _ => {
                return Err(ForgeError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
        }

        let body_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let total = body_length.map(|len| offset + len);

        notify_state(observer, DownloadState::Downloading);

        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }
            // A connection dropped mid-body surfaces as a read error when
            // the response declared a length; report it as a short transfer
            // so callers can resume rather than treat it as a network fault.
            let n = match response.read(&mut buffer) {
                Ok(n) => n,
                Err(e) => match body_length {
                    Some(expected) if downloaded < expected => {
                        return Err(ForgeError::IncompleteDownload {
                            url: url.to_string(),
                            got: downloaded,
                            expected,
                        });
                    }
                    _ => return Err(e.into()),
                },
            };
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
            downloaded += n as u64;
            notify_progress(observer, offset + downloaded, total);
        }
        file.flush()?;

        // A cleanly closed socket is not proof of a complete body.
        if let Some(expected) = body_length {
            if downloaded != expected {
                return Err(ForgeError::IncompleteDownload {
                    url: url.to_string(),
                    got: downloaded,
                    expected,
                });
            }
        }

        notify_state(observer, DownloadState::Complete);
        Ok(DownloadSummary {
            initial_size,
            downloaded,
            total,
        })
    }
}

fn notify_state(observer: &mut Option<&mut dyn DownloadObserver>, state: DownloadState) {
    if let Some(obs) = observer.as_deref_mut() {
        obs.on_state(state);
    }
}

fn notify_progress(
    observer: &mut Option<&mut dyn DownloadObserver>,
    downloaded: u64,
    total: Option<u64>,
) {
    if let Some(obs) = observer.as_deref_mut() {
        let percent = match total {
            Some(0) => 100.0,
            Some(t) => (downloaded as f32 / t as f32) * 100.0,
            None => 0.0,
        };
        obs.on_progress(downloaded, total, percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;
    use tiny_http::{Header, Response as HttpResponse, Server, StatusCode as HttpStatus};

    /// Loopback server honoring `Range: bytes=N-` over a fixed payload.
    fn spawn_range_server(payload: Vec<u8>) -> String {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let range_start = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Range"))
                    .and_then(|h| {
                        h.value
                            .as_str()
                            .strip_prefix("bytes=")?
                            .trim_end_matches('-')
                            .parse::<u64>()
                            .ok()
                    });

                match request.url() {
                    "/redirect" => {
                        let response = HttpResponse::empty(HttpStatus(302)).with_header(
                            Header::from_bytes(&b"Location"[..], &b"/payload"[..]).unwrap(),
                        );
                        let _ = request.respond(response);
                    }
                    "/missing" => {
                        let _ = request.respond(HttpResponse::empty(HttpStatus(404)));
                    }
                    _ => {
                        let (status, body) = match range_start {
                            Some(start) if start > 0 && (start as usize) <= payload.len() => {
                                (206, payload[start as usize..].to_vec())
                            }
                            _ => (200, payload.clone()),
                        };
                        let _ = request.respond(
                            HttpResponse::from_data(body).with_status_code(HttpStatus(status)),
                        );
                    }
                }
            }
        });
        addr
    }

    /// Loopback server that declares `declared` body bytes but closes the
    /// connection after sending only `body`.
    fn spawn_truncating_server(body: Vec<u8>, declared: usize) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                declared
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        });
        addr
    }

    #[derive(Default)]
    struct Recorder {
        states: Vec<DownloadState>,
        last_percent: f32,
    }

    impl DownloadObserver for Recorder {
        fn on_state(&mut self, state: DownloadState) {
            self.states.push(state);
        }
        fn on_progress(&mut self, _downloaded: u64, _total: Option<u64>, percent: f32) {
            self.last_percent = percent;
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn full_download() {
        let data = payload(4000);
        let addr = spawn_range_server(data.clone());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        let downloader = FileDownloader::new(HttpConfig::default());
        let mut recorder = Recorder::default();
        let summary = downloader
            .download(
                &format!("{}/payload", addr),
                &dest,
                &CancelToken::new(),
                Some(&mut recorder),
            )
            .unwrap();

        assert_eq!(summary.initial_size, 0);
        assert_eq!(summary.downloaded, 4000);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(
            recorder.states,
            vec![
                DownloadState::Connecting,
                DownloadState::Downloading,
                DownloadState::Complete
            ]
        );
        assert_eq!(recorder.last_percent, 100.0);
    }

    #[test]
    fn resumes_from_existing_prefix() {
        let data = payload(5000);
        let addr = spawn_range_server(data.clone());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");
        std::fs::write(&dest, &data[..1200]).unwrap();

        let downloader = FileDownloader::new(HttpConfig::default());
        let summary = downloader
            .download(&format!("{}/payload", addr), &dest, &CancelToken::new(), None)
            .unwrap();

        assert_eq!(summary.initial_size, 1200);
        assert_eq!(summary.downloaded, 5000 - 1200);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn follows_one_redirect() {
        let data = payload(800);
        let addr = spawn_range_server(data.clone());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        let downloader = FileDownloader::new(HttpConfig::default());
        let summary = downloader
            .download(&format!("{}/redirect", addr), &dest, &CancelToken::new(), None)
            .unwrap();

        assert_eq!(summary.downloaded, 800);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn http_error_status_is_reported() {
        let addr = spawn_range_server(payload(10));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        let downloader = FileDownloader::new(HttpConfig::default());
        let err = downloader
            .download(&format!("{}/missing", addr), &dest, &CancelToken::new(), None)
            .unwrap_err();
        assert!(matches!(err, ForgeError::HttpStatus { status: 404, .. }));
    }

    #[test]
    fn short_body_is_incomplete_even_on_clean_close() {
        // Declares 150 bytes, sends 100, then closes the socket.
        let addr = spawn_truncating_server(payload(100), 150);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        let downloader = FileDownloader::new(HttpConfig::default());
        let err = downloader
            .download(&format!("{}/payload", addr), &dest, &CancelToken::new(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::IncompleteDownload { got: 100, expected: 150, .. }
        ));
    }

    #[test]
    fn refused_connection_is_a_network_error_not_a_timeout() {
        // Grab a free port, then close the listener so connects are refused.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        let downloader = FileDownloader::new(HttpConfig::default());
        let err = downloader
            .download(
                &format!("http://127.0.0.1:{}/payload", port),
                &dest,
                &CancelToken::new(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ForgeError::Network(_)));
    }

    #[test]
    fn cancellation_is_distinct_and_notified() {
        let addr = spawn_range_server(payload(2000));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("payload.bin");

        let cancel = CancelToken::new();
        cancel.cancel();

        let downloader = FileDownloader::new(HttpConfig::default());
        let mut recorder = Recorder::default();
        let err = downloader
            .download(
                &format!("{}/payload", addr),
                &dest,
                &cancel,
                Some(&mut recorder),
            )
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(recorder.states.last(), Some(&DownloadState::Cancelled));
    }
}
