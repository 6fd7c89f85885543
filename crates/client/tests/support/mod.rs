//! In-process memcached binary protocol server for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use client::Node;
use parking_lot::Mutex;
use protocol::header::RequestHeader;
use protocol::{extras, Opcode, Request, Response, Status, HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Authentication the server demands before any other command.
#[derive(Debug, Clone)]
pub struct MockAuth {
    pub mechanism: String,
    pub payload: Vec<u8>,
    /// When set, the start request is answered with this challenge and the
    /// step request must carry `step_payload`.
    pub challenge: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub auth: Option<MockAuth>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    flags: u32,
    cas: u64,
}

#[derive(Debug, Default)]
struct State {
    items: Mutex<HashMap<Vec<u8>, Entry>>,
    next_cas: AtomicU64,
    connections: AtomicUsize,
    requests: AtomicUsize,
    auth_requests: AtomicUsize,
    stall: AtomicBool,
    stray: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
}

pub struct MockServer {
    addr: String,
    state: Arc<State>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(State::default());
        state.next_cas.store(1, Ordering::SeqCst);

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                let auth = options.auth.clone();
                let handle = tokio::spawn(serve(socket, state, auth));
                accept_state.tasks.lock().push(handle.abort_handle());
            }
        });
        state.tasks.lock().push(accept.abort_handle());
        Self { addr, state }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn node(&self, key: &str) -> Node {
        Node::new(key, self.addr.clone())
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Request frames received so far.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn auth_requests(&self) -> usize {
        self.state.auth_requests.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.state.items.lock().len()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.state.items.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state
            .items
            .lock()
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect()
    }

    /// Read requests but never answer them.
    pub fn set_stall(&self, stall: bool) {
        self.state.stall.store(stall, Ordering::SeqCst);
    }

    /// Follow the next reply with an unsolicited frame.
    pub fn send_stray(&self) {
        self.state.stray.store(true, Ordering::SeqCst);
    }

    /// Stop accepting and drop every open connection.
    pub fn kill(&self) {
        for task in self.state.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.kill();
    }
}

/// An address nothing listens on.
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn serve(mut socket: TcpStream, state: Arc<State>, auth: Option<MockAuth>) {
    let mut authenticated = auth.is_none();
    loop {
        let mut head = [0u8; HEADER_LEN];
        if socket.read_exact(&mut head).await.is_err() {
            return;
        }
        let Ok(header) = RequestHeader::decode(&head) else { return };
        let mut body = vec![0u8; header.body_len as usize];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }
        let Ok(request) = Request::from_parts(header, Bytes::from(body)) else { return };
        state.requests.fetch_add(1, Ordering::SeqCst);
        if state.stall.load(Ordering::SeqCst) {
            continue;
        }

        let replies = handle(&state, auth.as_ref(), &mut authenticated, &request);
        let mut out = BytesMut::new();
        for reply in &replies {
            reply.encode(&mut out);
        }
        if !replies.is_empty() && state.stray.swap(false, Ordering::SeqCst) {
            Response::new(Opcode::Noop, Status::NoError, 0xdead).encode(&mut out);
        }
        if !out.is_empty() && socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn handle(state: &State, auth: Option<&MockAuth>, authenticated: &mut bool, request: &Request) -> Vec<Response> {
    let opcode = request.opcode;
    let quiet = opcode.is_quiet();
    let reply = |status: Status| Response::new(opcode, status, request.opaque);
    let fail = |status: Status| vec![reply(status).with_value(status.description())];

    match opcode.loud() {
        Opcode::SaslListMechs => {
            let mechanisms = auth.map(|a| a.mechanism.clone()).unwrap_or_else(|| "PLAIN".into());
            return vec![reply(Status::NoError).with_value(mechanisms)];
        }
        Opcode::SaslAuth => {
            state.auth_requests.fetch_add(1, Ordering::SeqCst);
            let Some(auth) = auth else { return vec![reply(Status::NoError)] };
            if request.key != auth.mechanism.as_bytes() || request.value != auth.payload.as_slice() {
                return fail(Status::AuthError);
            }
            if let Some((challenge, _)) = &auth.challenge {
                return vec![reply(Status::AuthContinue).with_value(challenge.clone())];
            }
            *authenticated = true;
            return vec![reply(Status::NoError).with_value("Authenticated")];
        }
        Opcode::SaslStep => {
            let expected = auth.and_then(|a| a.challenge.as_ref()).map(|(_, step)| step.as_slice());
            if expected != Some(request.value.as_ref()) {
                return fail(Status::AuthError);
            }
            *authenticated = true;
            return vec![reply(Status::NoError).with_value("Authenticated")];
        }
        _ if !*authenticated => return fail(Status::AuthError),
        _ => {}
    }

    let key = request.key.to_vec();
    let mut items = state.items.lock();
    match opcode.loud() {
        Opcode::Noop => vec![reply(Status::NoError)],
        Opcode::Version => vec![reply(Status::NoError).with_value("1.6.0-mock")],
        Opcode::Get | Opcode::GetK => match items.get(&key) {
            Some(entry) => {
                let mut response = reply(Status::NoError)
                    .with_cas(entry.cas)
                    .with_extras(entry.flags.to_be_bytes().to_vec())
                    .with_value(entry.value.clone());
                if matches!(opcode, Opcode::GetK | Opcode::GetKQ) {
                    response = response.with_key(request.key.clone());
                }
                vec![response]
            }
            None if quiet => vec![],
            None => fail(Status::KeyNotFound),
        },
        Opcode::Set | Opcode::Add | Opcode::Replace => {
            let Ok((flags, _expiration)) = extras::parse_store(&request.extras) else {
                return fail(Status::InvalidArguments);
            };
            let existing = items.get(&key);
            let status = match (opcode.loud(), existing) {
                (Opcode::Add, Some(_)) => Some(Status::KeyExists),
                (Opcode::Replace, None) => Some(Status::KeyNotFound),
                (_, Some(entry)) if request.cas != 0 && entry.cas != request.cas => Some(Status::KeyExists),
                (_, None) if request.cas != 0 => Some(Status::KeyNotFound),
                _ => None,
            };
            if let Some(status) = status {
                return fail(status);
            }
            let cas = state.next_cas.fetch_add(1, Ordering::SeqCst);
            items.insert(
                key,
                Entry {
                    value: request.value.clone(),
                    flags,
                    cas,
                },
            );
            if quiet {
                vec![]
            } else {
                vec![reply(Status::NoError).with_cas(cas)]
            }
        }
        Opcode::Append | Opcode::Prepend => {
            let Some(entry) = items.get_mut(&key) else {
                return fail(Status::ItemNotStored);
            };
            let mut joined = Vec::with_capacity(entry.value.len() + request.value.len());
            if opcode.loud() == Opcode::Append {
                joined.extend_from_slice(&entry.value);
                joined.extend_from_slice(&request.value);
            } else {
                joined.extend_from_slice(&request.value);
                joined.extend_from_slice(&entry.value);
            }
            entry.value = Bytes::from(joined);
            entry.cas = state.next_cas.fetch_add(1, Ordering::SeqCst);
            if quiet {
                vec![]
            } else {
                vec![reply(Status::NoError).with_cas(entry.cas)]
            }
        }
        Opcode::Delete => {
            let current = items.get(&key).map(|entry| entry.cas);
            match current {
                Some(cas) if request.cas != 0 && cas != request.cas => fail(Status::KeyExists),
                Some(_) => {
                    items.remove(&key);
                    if quiet {
                        vec![]
                    } else {
                        vec![reply(Status::NoError)]
                    }
                }
                None => fail(Status::KeyNotFound),
            }
        }
        Opcode::Increment | Opcode::Decrement => {
            let Ok((delta, initial, expiration)) = extras::parse_counter(&request.extras) else {
                return fail(Status::InvalidArguments);
            };
            let next = match items.get(&key) {
                Some(entry) => {
                    let Some(current) = std::str::from_utf8(&entry.value)
                        .ok()
                        .and_then(|text| text.trim().parse::<u64>().ok())
                    else {
                        return fail(Status::NonNumericValue);
                    };
                    if opcode.loud() == Opcode::Increment {
                        current.wrapping_add(delta)
                    } else {
                        current.saturating_sub(delta)
                    }
                }
                None if expiration == extras::NO_AUTO_CREATE => return fail(Status::KeyNotFound),
                None => initial,
            };
            let cas = state.next_cas.fetch_add(1, Ordering::SeqCst);
            items.insert(
                key,
                Entry {
                    value: Bytes::from(next.to_string()),
                    flags: 0,
                    cas,
                },
            );
            vec![reply(Status::NoError)
                .with_cas(cas)
                .with_value(next.to_be_bytes().to_vec())]
        }
        Opcode::Touch => {
            if items.contains_key(&key) {
                vec![reply(Status::NoError)]
            } else {
                fail(Status::KeyNotFound)
            }
        }
        Opcode::Flush => {
            items.clear();
            if quiet {
                vec![]
            } else {
                vec![reply(Status::NoError)]
            }
        }
        _ => fail(Status::UnknownCommand),
    }
}
