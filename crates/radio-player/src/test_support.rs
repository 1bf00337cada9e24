//! Shared test fixtures: a local HTTP server and generated audio files.

use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tiny_http::{Header, Response, Server, StatusCode};

/// How the fixture answers one path.
#[derive(Clone, Debug)]
pub(crate) struct Route {
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    /// Send `body`, then never finish the response.
    stall: bool,
}

impl Route {
    pub(crate) fn body(text: &str) -> Self {
        Self::bytes(text.as_bytes().to_vec())
    }

    pub(crate) fn bytes(body: Vec<u8>) -> Self {
        Self {
            body,
            headers: Vec::new(),
            stall: false,
        }
    }

    /// Hang until the server is dropped.
    pub(crate) fn stall() -> Self {
        Self {
            body: Vec::new(),
            headers: Vec::new(),
            stall: true,
        }
    }

    /// Send the body, then hang until the server is dropped.
    pub(crate) fn then_stall(mut self) -> Self {
        self.stall = true;
        self
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Minimal HTTP server on an ephemeral localhost port.
pub(crate) struct FixtureServer {
    base: String,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FixtureServer {
    pub(crate) fn start(routes: Vec<(&str, Route)>) -> Self {
        let server = Server::http("127.0.0.1:0").expect("bind fixture server");
        let addr = server
            .server_addr()
            .to_ip()
            .expect("fixture server has an ip address");
        let routes: Vec<(String, Route)> = routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();

        let handle = thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let request = match server.recv_timeout(Duration::from_millis(20)) {
                    Ok(Some(request)) => request,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                let path = request.url().split('?').next().unwrap_or("").to_string();
                let Some(route) = routes.iter().find(|(p, _)| *p == path).map(|(_, r)| r.clone())
                else {
                    let _ = request.respond(Response::empty(StatusCode(404)));
                    continue;
                };
                let stop = stop.clone();
                thread::spawn(move || {
                    let headers: Vec<Header> = route
                        .headers
                        .iter()
                        .filter_map(|(k, v)| Header::from_bytes(k.as_bytes(), v.as_bytes()).ok())
                        .collect();
                    if route.stall {
                        let reader = Cursor::new(route.body).chain(StallReader { stop });
                        let _ = request.respond(Response::new(
                            StatusCode(200),
                            headers,
                            reader,
                            None,
                            None,
                        ));
                    } else {
                        let mut response = Response::from_data(route.body);
                        for header in headers {
                            response.add_header(header);
                        }
                        let _ = request.respond(response);
                    }
                });
            }
        });

        Self {
            base: format!("http://{addr}"),
            shutdown,
            handle: Some(handle),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct StallReader {
    stop: Arc<AtomicBool>,
}

impl Read for StallReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        while !self.stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(0)
    }
}

/// A 16-bit PCM WAV file holding a quiet sawtooth.
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let block_align = channels as u32 * 2;
    let data_len = frames as u32 * block_align;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let sample = ((i % 100) as i16 - 50) * 64;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}
