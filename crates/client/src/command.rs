//! Commands: what goes on the wire for one exchange and how the replies
//! are folded back into a result.
//!
//! A command encodes one or more request frames and then consumes response
//! frames until it reports [`Step::Complete`]. Single-key commands finish on
//! their one reply. Multi-key commands send quiet requests followed by a
//! `Noop`; servers only answer quiet requests that fail (or gets that hit),
//! and the `Noop` reply closes the exchange.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use protocol::{extras, Opcode, ProtocolError, Request, Response, Status};
use serde::{Deserialize, Serialize};

use crate::key::WireKey;

/// Operation families that configuration can switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Get,
    Store,
    Delete,
    Counter,
    Touch,
    Flush,
    /// Noop, version and mechanism listing.
    Info,
    /// SASL exchanges; never disabled.
    Auth,
}

/// A cached value with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Bytes,
    pub flags: u32,
    pub cas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

impl StoreMode {
    pub fn opcode(self) -> Opcode {
        match self {
            StoreMode::Set => Opcode::Set,
            StoreMode::Add => Opcode::Add,
            StoreMode::Replace => Opcode::Replace,
            StoreMode::Append => Opcode::Append,
            StoreMode::Prepend => Opcode::Prepend,
        }
    }

    /// Append and prepend carry neither flags nor expiration.
    fn has_extras(self) -> bool {
        matches!(self, StoreMode::Set | StoreMode::Add | StoreMode::Replace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    Increment,
    Decrement,
}

impl CounterMode {
    fn opcode(self) -> Opcode {
        match self {
            CounterMode::Increment => Opcode::Increment,
            CounterMode::Decrement => Opcode::Decrement,
        }
    }
}

/// Terminal status of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: Status,
    pub message: Option<String>,
}

impl Completion {
    fn ok() -> Self {
        Self {
            status: Status::NoError,
            message: None,
        }
    }

    fn of(response: &Response) -> Self {
        Self {
            status: response.status(),
            message: response.error_message(),
        }
    }
}

/// Progress after one response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Pending,
    Complete(Completion),
}

/// One request/response exchange with a node.
#[derive(Debug, Clone)]
pub enum Command {
    Get(Get),
    MultiGet(MultiGet),
    Store(Store),
    MultiStore(MultiStore),
    Delete(Delete),
    MultiDelete(MultiDelete),
    Counter(Counter),
    Touch(Touch),
    Flush(Flush),
    Noop,
    Version(Version),
    SaslList(SaslList),
    SaslAuth(SaslAuth),
}

impl Command {
    pub fn operation(&self) -> Operation {
        match self {
            Command::Get(_) | Command::MultiGet(_) => Operation::Get,
            Command::Store(_) | Command::MultiStore(_) => Operation::Store,
            Command::Delete(_) | Command::MultiDelete(_) => Operation::Delete,
            Command::Counter(_) => Operation::Counter,
            Command::Touch(_) => Operation::Touch,
            Command::Flush(_) => Operation::Flush,
            Command::Noop | Command::Version(_) | Command::SaslList(_) => Operation::Info,
            Command::SaslAuth(_) => Operation::Auth,
        }
    }

    /// Encode every request frame of this command as write segments.
    pub fn encode(&self, scratch: &mut BytesMut, out: &mut Vec<Bytes>) -> Result<(), ProtocolError> {
        for request in self.requests() {
            request.encode_segments(scratch, out)?;
        }
        Ok(())
    }

    fn requests(&self) -> Vec<Request> {
        match self {
            Command::Get(cmd) => vec![Request::new(Opcode::Get).with_key(cmd.key.wire().clone())],
            Command::MultiGet(cmd) => cmd.requests(),
            Command::Store(cmd) => vec![cmd.request()],
            Command::MultiStore(cmd) => cmd.requests(),
            Command::Delete(cmd) => vec![Request::new(Opcode::Delete)
                .with_key(cmd.key.wire().clone())
                .with_cas(cmd.cas)],
            Command::MultiDelete(cmd) => cmd.requests(),
            Command::Counter(cmd) => vec![cmd.request()],
            Command::Touch(cmd) => vec![Request::new(Opcode::Touch)
                .with_extras(extras::expiration(cmd.expiration))
                .with_key(cmd.key.wire().clone())],
            Command::Flush(cmd) => {
                vec![Request::new(Opcode::Flush).with_extras(extras::expiration(cmd.delay))]
            }
            Command::Noop => vec![Request::new(Opcode::Noop)],
            Command::Version(_) => vec![Request::new(Opcode::Version)],
            Command::SaslList(_) => vec![Request::new(Opcode::SaslListMechs)],
            Command::SaslAuth(cmd) => vec![Request::new(cmd.opcode)
                .with_key(Bytes::copy_from_slice(cmd.mechanism.as_bytes()))
                .with_value(cmd.payload.clone())],
        }
    }

    /// Feed one decoded response frame to the command.
    ///
    /// An error means the stream no longer lines up with what was sent and
    /// the connection must not be reused.
    pub fn on_response(&mut self, response: Response) -> Result<Step, ProtocolError> {
        match self {
            Command::Get(cmd) => {
                expect_single(&response, Opcode::Get)?;
                let completion = Completion::of(&response);
                if response.status().is_success() {
                    cmd.item = Some(Item {
                        flags: extras::get_flags(&response.extras)?,
                        cas: response.cas(),
                        value: response.value,
                    });
                }
                Ok(Step::Complete(completion))
            }
            Command::MultiGet(cmd) => cmd.on_response(response),
            Command::Store(cmd) => {
                expect_single(&response, cmd.mode.opcode())?;
                if response.status().is_success() {
                    cmd.stored_cas = Some(response.cas());
                }
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::MultiStore(cmd) => cmd.on_response(response),
            Command::Delete(_) => {
                expect_single(&response, Opcode::Delete)?;
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::MultiDelete(cmd) => cmd.on_response(response),
            Command::Counter(cmd) => {
                expect_single(&response, cmd.mode.opcode())?;
                if response.status().is_success() {
                    cmd.value = Some(extras::counter_value(&response.value)?);
                }
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::Touch(_) => {
                expect_single(&response, Opcode::Touch)?;
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::Flush(_) => {
                expect_single(&response, Opcode::Flush)?;
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::Noop => {
                expect_single(&response, Opcode::Noop)?;
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::Version(cmd) => {
                expect_single(&response, Opcode::Version)?;
                if response.status().is_success() {
                    cmd.version = Some(String::from_utf8_lossy(&response.value).into_owned());
                }
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::SaslList(cmd) => {
                expect_single(&response, Opcode::SaslListMechs)?;
                if response.status().is_success() {
                    cmd.mechanisms = String::from_utf8_lossy(&response.value)
                        .split_whitespace()
                        .map(str::to_owned)
                        .collect();
                }
                Ok(Step::Complete(Completion::of(&response)))
            }
            Command::SaslAuth(cmd) => {
                expect_single(&response, cmd.opcode)?;
                let completion = Completion {
                    status: response.status(),
                    message: None,
                };
                cmd.challenge = response.value;
                Ok(Step::Complete(completion))
            }
        }
    }
}

fn expect_single(response: &Response, opcode: Opcode) -> Result<(), ProtocolError> {
    if response.header.opcode != opcode.as_u8() {
        return Err(ProtocolError::UnexpectedOpcode(response.header.opcode));
    }
    if response.opaque() != 0 {
        return Err(ProtocolError::OpaqueMismatch {
            expected: 0,
            actual: response.opaque(),
        });
    }
    Ok(())
}

/// Resolve a pipelined reply to the index of the request it answers, or
/// `None` for the terminating `Noop`.
fn pipelined_index(response: &Response, count: usize) -> Result<Option<usize>, ProtocolError> {
    let opaque = response.opaque() as usize;
    if opaque == count {
        if response.opcode() != Some(Opcode::Noop) {
            return Err(ProtocolError::UnexpectedOpcode(response.header.opcode));
        }
        return Ok(None);
    }
    if opaque > count {
        return Err(ProtocolError::OpaqueMismatch {
            expected: count as u32,
            actual: response.opaque(),
        });
    }
    Ok(Some(opaque))
}

fn noop(count: usize) -> Request {
    Request::new(Opcode::Noop).with_opaque(count as u32)
}

// ----------------------------------------------------------------------
// Single-key commands
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Get {
    key: WireKey,
    item: Option<Item>,
}

impl Get {
    pub fn new(key: WireKey) -> Self {
        Self { key, item: None }
    }

    pub fn take_item(&mut self) -> Option<Item> {
        self.item.take()
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    mode: StoreMode,
    key: WireKey,
    value: Bytes,
    flags: u32,
    expiration: u32,
    cas: u64,
    stored_cas: Option<u64>,
}

impl Store {
    pub fn new(mode: StoreMode, key: WireKey, value: Bytes) -> Self {
        Self {
            mode,
            key,
            value,
            flags: 0,
            expiration: 0,
            cas: 0,
            stored_cas: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    /// Only store if the item's current CAS matches.
    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// CAS of the stored item, once the server acknowledged it.
    pub fn stored_cas(&self) -> Option<u64> {
        self.stored_cas
    }

    fn request(&self) -> Request {
        let mut request = Request::new(self.mode.opcode())
            .with_key(self.key.wire().clone())
            .with_value(self.value.clone())
            .with_cas(self.cas);
        if self.mode.has_extras() {
            request = request.with_extras(extras::store(self.flags, self.expiration));
        }
        request
    }
}

#[derive(Debug, Clone)]
pub struct Delete {
    key: WireKey,
    cas: u64,
}

impl Delete {
    pub fn new(key: WireKey) -> Self {
        Self { key, cas: 0 }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Counter {
    mode: CounterMode,
    key: WireKey,
    delta: u64,
    initial: Option<u64>,
    expiration: u32,
    value: Option<u64>,
}

impl Counter {
    /// `initial` is the value a missing counter is created with; `None`
    /// makes the server fail with key-not-found instead.
    pub fn new(mode: CounterMode, key: WireKey, delta: u64, initial: Option<u64>) -> Self {
        Self {
            mode,
            key,
            delta,
            initial,
            expiration: 0,
            value: None,
        }
    }

    pub fn with_expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn value(&self) -> Option<u64> {
        self.value
    }

    fn request(&self) -> Request {
        let extras = match self.initial {
            Some(initial) => extras::counter(self.delta, initial, self.expiration),
            None => extras::counter(self.delta, 0, extras::NO_AUTO_CREATE),
        };
        Request::new(self.mode.opcode())
            .with_extras(extras)
            .with_key(self.key.wire().clone())
    }
}

#[derive(Debug, Clone)]
pub struct Touch {
    key: WireKey,
    expiration: u32,
}

impl Touch {
    pub fn new(key: WireKey, expiration: u32) -> Self {
        Self { key, expiration }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Flush {
    delay: u32,
}

impl Flush {
    pub fn new(delay: u32) -> Self {
        Self { delay }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Version {
    version: Option<String>,
}

impl Version {
    pub fn take(&mut self) -> Option<String> {
        self.version.take()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaslList {
    mechanisms: Vec<String>,
}

impl SaslList {
    pub fn mechanisms(&self) -> &[String] {
        &self.mechanisms
    }
}

/// One SASL round trip (`SaslAuth` to start, `SaslStep` to continue).
#[derive(Debug, Clone)]
pub struct SaslAuth {
    opcode: Opcode,
    mechanism: String,
    payload: Bytes,
    challenge: Bytes,
}

impl SaslAuth {
    pub fn start(mechanism: impl Into<String>, payload: Bytes) -> Self {
        Self {
            opcode: Opcode::SaslAuth,
            mechanism: mechanism.into(),
            payload,
            challenge: Bytes::new(),
        }
    }

    pub fn step(mechanism: impl Into<String>, payload: Bytes) -> Self {
        Self {
            opcode: Opcode::SaslStep,
            ..Self::start(mechanism, payload)
        }
    }

    /// Server data returned with the last reply.
    pub fn challenge(&self) -> &Bytes {
        &self.challenge
    }
}

// ----------------------------------------------------------------------
// Pipelined multi-key commands
// ----------------------------------------------------------------------

/// Quiet keyed gets terminated by a `Noop`; misses produce no reply.
#[derive(Debug, Clone)]
pub struct MultiGet {
    keys: Vec<WireKey>,
    items: HashMap<String, Item>,
    errors: Vec<(String, Status)>,
}

impl MultiGet {
    pub fn new(keys: Vec<WireKey>) -> Self {
        Self {
            items: HashMap::with_capacity(keys.len()),
            keys,
            errors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Hits keyed by the caller's original key.
    pub fn take_items(&mut self) -> HashMap<String, Item> {
        std::mem::take(&mut self.items)
    }

    /// Keys the server answered with a status other than hit or miss.
    pub fn errors(&self) -> &[(String, Status)] {
        &self.errors
    }

    fn requests(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                Request::new(Opcode::GetKQ)
                    .with_opaque(index as u32)
                    .with_key(key.wire().clone())
            })
            .collect();
        requests.push(noop(self.keys.len()));
        requests
    }

    fn on_response(&mut self, response: Response) -> Result<Step, ProtocolError> {
        let Some(index) = pipelined_index(&response, self.keys.len())? else {
            return Ok(Step::Complete(Completion::ok()));
        };
        let key = &self.keys[index];
        match response.status() {
            Status::NoError => {
                if !response.key.is_empty() && response.key != *key.wire() {
                    return Err(ProtocolError::MalformedValue("reply key does not match request"));
                }
                let item = Item {
                    flags: extras::get_flags(&response.extras)?,
                    cas: response.cas(),
                    value: response.value,
                };
                self.items.insert(key.original().to_owned(), item);
            }
            Status::KeyNotFound => {}
            status => self.errors.push((key.original().to_owned(), status)),
        }
        Ok(Step::Pending)
    }
}

/// Quiet stores terminated by a `Noop`; only failures produce a reply.
#[derive(Debug, Clone)]
pub struct MultiStore {
    mode: StoreMode,
    entries: Vec<(WireKey, Bytes)>,
    flags: u32,
    expiration: u32,
    failures: Vec<(String, Status)>,
    first_message: Option<String>,
}

impl MultiStore {
    pub fn new(mode: StoreMode, entries: Vec<(WireKey, Bytes)>, expiration: u32) -> Self {
        Self {
            mode,
            entries,
            flags: 0,
            expiration,
            failures: Vec::new(),
            first_message: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn failures(&self) -> &[(String, Status)] {
        &self.failures
    }

    fn requests(&self) -> Vec<Request> {
        let opcode = self.mode.opcode().quiet();
        let mut requests: Vec<Request> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, (key, value))| {
                let mut request = Request::new(opcode)
                    .with_opaque(index as u32)
                    .with_key(key.wire().clone())
                    .with_value(value.clone());
                if self.mode.has_extras() {
                    request = request.with_extras(extras::store(self.flags, self.expiration));
                }
                request
            })
            .collect();
        requests.push(noop(self.entries.len()));
        requests
    }

    fn on_response(&mut self, response: Response) -> Result<Step, ProtocolError> {
        let Some(index) = pipelined_index(&response, self.entries.len())? else {
            return Ok(Step::Complete(first_failure(&self.failures, self.first_message.take())));
        };
        if !response.status().is_success() {
            if self.failures.is_empty() {
                self.first_message = response.error_message();
            }
            let key = self.entries[index].0.original().to_owned();
            self.failures.push((key, response.status()));
        }
        Ok(Step::Pending)
    }
}

/// Quiet deletes terminated by a `Noop`.
///
/// A key that is already absent counts as deleted.
#[derive(Debug, Clone)]
pub struct MultiDelete {
    keys: Vec<WireKey>,
    failures: Vec<(String, Status)>,
    first_message: Option<String>,
    missing: usize,
}

impl MultiDelete {
    pub fn new(keys: Vec<WireKey>) -> Self {
        Self {
            keys,
            failures: Vec::new(),
            first_message: None,
            missing: 0,
        }
    }

    pub fn failures(&self) -> &[(String, Status)] {
        &self.failures
    }

    /// Keys the server reported as not present.
    pub fn missing(&self) -> usize {
        self.missing
    }

    fn requests(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                Request::new(Opcode::DeleteQ)
                    .with_opaque(index as u32)
                    .with_key(key.wire().clone())
            })
            .collect();
        requests.push(noop(self.keys.len()));
        requests
    }

    fn on_response(&mut self, response: Response) -> Result<Step, ProtocolError> {
        let Some(index) = pipelined_index(&response, self.keys.len())? else {
            return Ok(Step::Complete(first_failure(&self.failures, self.first_message.take())));
        };
        match response.status() {
            Status::NoError => {}
            Status::KeyNotFound => self.missing += 1,
            status => {
                if self.failures.is_empty() {
                    self.first_message = response.error_message();
                }
                self.failures.push((self.keys[index].original().to_owned(), status));
            }
        }
        Ok(Step::Pending)
    }
}

fn first_failure(failures: &[(String, Status)], message: Option<String>) -> Completion {
    match failures.first() {
        Some((_, status)) => Completion {
            status: *status,
            message,
        },
        None => Completion::ok(),
    }
}
