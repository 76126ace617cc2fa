// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! The request/response multiplexer.
//!
//! A single connection serves arbitrarily many concurrent logical
//! requests in either direction over one byte-stream pair. All
//! coordination runs through one condition variable over shared counters;
//! exactly one thread at a time holds the reader seat on the input
//! stream.
//!
//! The gate: a thread may take the reader seat iff the request queue is
//! empty, nobody else is receiving, no routed responses await
//! consumption, and either nothing is being processed or every processing
//! thread is itself waiting on a response. The last clause is what makes
//! nested calls live: whenever all workers are suspended awaiting peer
//! replies, one of them wins the seat and keeps frames flowing, so a
//! response can never deadlock behind an in-flight request.
//!
//! Requests carry `target = 0`; nested requests issued while serving a
//! peer's request carry the peer's thread id, which steers them to the
//! exact thread whose call stack awaits them on the other side.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tether_logging::macros::*;
use tether_wire::{FramedRead, FramedWrite};

use crate::codec;
use crate::dispatch;
use crate::error::{Error, RemoteError, Result, ScriptError, WELL_KNOWN_EXCEPTIONS};
use crate::interp::Interp;
use crate::message::{Kind, Message, ThreadId};
use crate::ops;
use crate::proxy::Proxy;
use crate::tables::{PendingDeletes, Tables};
use crate::transport::StreamPair;
use crate::value::{Obj, ObjectId, Value};

type Codec = <crate::message::Framing as tether_wire::Framing>::Codec;
type Reader = FramedRead<Box<dyn Read + Send>, Codec>;
type Writer = FramedWrite<Box<dyn Write + Send>, Codec>;

static NEXT_THREAD_IDENT: AtomicI64 = AtomicI64::new(1);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_IDENT: Cell<ThreadId> = Cell::new(0);
}

/// Process-unique identifier of the calling logical thread. Assigned
/// lazily; never zero (zero is the "any handler" address on the wire).
pub(crate) fn thread_ident() -> ThreadId {
    THREAD_IDENT.with(|cell| {
        let mut id = cell.get();
        if id == 0 {
            id = NEXT_THREAD_IDENT.fetch_add(1, Ordering::SeqCst);
            cell.set(id);
        }
        id
    })
}

/// Per-thread multiplexer record: the response slot plus the state needed
/// to steer nested calls.
#[derive(Default)]
struct ThreadState {
    /// How many inbound requests this thread is currently handling
    request_count: u32,
    /// Peer thread whose request this thread is handling; target of our
    /// nested requests and responses
    peer_thread: ThreadId,
    /// Routed message awaiting consumption by this thread
    response: Option<Message>,
}

struct MuxState {
    open: bool,
    /// Somebody holds the reader seat
    receiving: bool,
    /// Threads currently executing inbound requests
    processing: u32,
    /// How many of `processing` are blocked on a nested response
    waiting: u32,
    /// Routed, not yet consumed messages held in thread slots
    responses: u32,
    /// Received requests not yet picked up by a handler
    requests: VecDeque<Message>,
    threads: HashMap<ThreadId, ThreadState>,
}

impl MuxState {
    fn thread(&mut self, id: ThreadId) -> &mut ThreadState {
        self.threads.entry(id).or_default()
    }
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Objects this side has exported to the peer
    pub exported_objects: usize,
    /// Live handles to the peer's objects
    pub live_proxies: usize,
}

pub struct Connection {
    connid: u64,
    rx: Mutex<Reader>,
    tx: Mutex<Writer>,
    shutdown: Mutex<Option<Box<dyn FnMut() + Send>>>,
    state: Mutex<MuxState>,
    cond: Condvar,
    tables: Tables,
    pending: PendingDeletes,
    gc_enabled: AtomicBool,
    gc_interval_ms: AtomicU64,
    interp: Interp,
}

impl Connection {
    /// Build a connection over a byte-stream pair. The caller decides who
    /// serves: spawn a thread running [`Connection::serve_forever`] to
    /// answer the peer's requests.
    pub fn over(streams: StreamPair) -> Arc<Connection> {
        let connid = NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst);
        let StreamPair { rx, tx, shutdown } = streams;
        debug!("connection {}: created", connid);
        Arc::new(Connection {
            connid,
            rx: Mutex::new(FramedRead::new(rx, Codec::default())),
            tx: Mutex::new(FramedWrite::new(tx, Codec::default())),
            shutdown: Mutex::new(Some(shutdown)),
            state: Mutex::new(MuxState {
                open: true,
                receiving: false,
                processing: 0,
                waiting: 0,
                responses: 0,
                requests: VecDeque::new(),
                threads: HashMap::new(),
            }),
            cond: Condvar::new(),
            tables: Tables::new(),
            pending: PendingDeletes::new(),
            gc_enabled: AtomicBool::new(true),
            gc_interval_ms: AtomicU64::new(5_000),
            interp: Interp::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.connid
    }

    pub(crate) fn tables(&self) -> &Tables {
        &self.tables
    }

    pub(crate) fn interp(&self) -> &Interp {
        &self.interp
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled.load(Ordering::SeqCst)
    }

    /// With GC disabled the proxy table keeps strong references and no
    /// Delete messages are produced.
    pub fn set_gc_enabled(&self, enabled: bool) {
        self.gc_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms.load(Ordering::SeqCst))
    }

    pub fn set_gc_interval(&self, interval: Duration) {
        self.gc_interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn stats(&self) -> ConnectionStats {
        let tables = self.tables.lock();
        ConnectionStats {
            exported_objects: tables.exported_count(),
            live_proxies: tables.live_proxy_count(),
        }
    }

    pub fn exported_object_ids(&self) -> Vec<ObjectId> {
        self.tables.lock().exported_ids()
    }

    /// True when the proxy was manufactured by this connection.
    pub(crate) fn owns_proxy(&self, proxy: &Proxy) -> bool {
        proxy.inner.conn.as_ptr() == self as *const Connection
    }

    /// Reclamation hook target; called from proxy drops.
    pub(crate) fn enqueue_delete(&self, id: ObjectId, version: u64) {
        self.pending.enqueue(id, version);
    }

    fn state(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().expect("BUG: multiplexer mutex poisoned")
    }

    fn log_state(&self, st: &MuxState, site: &str) {
        trace!(
            "connection {}: {}: open={} receiving={} processing={} waiting={} responses={} requests={} threads={}",
            self.connid,
            site,
            st.open,
            st.receiving,
            st.processing,
            st.waiting,
            st.responses,
            st.requests.len(),
            st.threads.len(),
        );
    }

    /// Idempotent shutdown: flags the connection closed, wakes every
    /// waiter with a closed-connection error, and closes both streams.
    /// Safe to call from any thread.
    pub fn close(&self) {
        {
            let mut st = self.state();
            if !st.open {
                return;
            }
            st.open = false;
            self.cond.notify_all();
        }
        self.tables.close();
        if let Some(mut shutdown) = self
            .shutdown
            .lock()
            .expect("BUG: shutdown hook mutex poisoned")
            .take()
        {
            shutdown();
        }
        debug!("connection {}: closed", self.connid);
    }

    /// Transition to closed after an unrecoverable error, passing the
    /// error through.
    fn fatal(&self, e: Error) -> Error {
        if self.is_open() {
            warn!("connection {}: fatal: {}", self.connid, e);
            self.close();
        }
        e
    }

    /// Serve asynchronous requests from the peer until close.
    pub fn serve_forever(self: &Arc<Self>) {
        debug!("connection {}: serving", self.connid);
        loop {
            match self.wait_for_request() {
                Err(Error::Closed) => break,
                Err(e) => {
                    debug!("connection {}: serve loop error: {}", self.connid, e);
                    break;
                }
                Ok(None) => continue,
                Ok(Some(msg)) => {
                    match self.handle(msg) {
                        Ok(_) => (),
                        Err(Error::Closed) | Err(Error::Io(_)) => break,
                        Err(e) => {
                            debug!("connection {}: handler failed: {}", self.connid, e);
                            if !self.is_open() {
                                break;
                            }
                        }
                    }
                    // Handler slot no longer needed by this serve pass
                    let me = thread_ident();
                    let mut st = self.state();
                    if let Some(ts) = st.threads.get(&me) {
                        if ts.request_count == 0 && ts.response.is_none() {
                            st.threads.remove(&me);
                        }
                    }
                }
            }
        }
        debug!("connection {}: leaving serve loop", self.connid);
    }

    /// Send a request and block until its response arrives. Requests
    /// routed to this thread while it waits are dispatched inline, which
    /// is what allows mutual recursion between peers.
    pub fn request(self: &Arc<Self>, kind: Kind, args: Value) -> Result<Value> {
        let me = thread_ident();
        let target;
        {
            let mut st = self.state();
            if !st.open {
                return Err(Error::Closed);
            }
            let nested = {
                let ts = st.thread(me);
                target = ts.peer_thread;
                ts.request_count > 0
            };
            // A nested request: the threads processing count stays, but
            // mark us waiting so another thread may take the reader seat
            if nested {
                st.waiting += 1;
                if st.processing == st.waiting {
                    self.cond.notify_one();
                }
            }
        }
        let result = self.request_inner(me, kind, args, target);
        {
            let mut st = self.state();
            if let Some(ts) = st.threads.get(&me) {
                if ts.request_count == 0 && ts.response.is_none() {
                    st.threads.remove(&me);
                }
            }
        }
        result
    }

    fn request_inner(
        self: &Arc<Self>,
        me: ThreadId,
        kind: Kind,
        args: Value,
        target: ThreadId,
    ) -> Result<Value> {
        if let Err(e) = self.send_message(kind, &args, target) {
            // No response will come; undo the waiting mark
            let mut st = self.state();
            if st.threads.get(&me).map_or(0, |ts| ts.request_count) > 0 && st.waiting > 0 {
                st.waiting -= 1;
            }
            return Err(e);
        }
        loop {
            let msg = match self.wait_for_response(me)? {
                Some(msg) => msg,
                None => continue,
            };
            if msg.kind.is_response() {
                return self.handle(msg);
            }
            // A request steered back to us mid-flight: process it before
            // resuming the wait
            self.handle(msg)?;
        }
    }

    /// Wait until a request is available for this thread, reading from
    /// the stream if the gate admits us. `Ok(None)` means "nothing for
    /// us, ask again".
    fn wait_for_request(self: &Arc<Self>) -> Result<Option<Message>> {
        let mut st = self.state();
        while st.open
            && st.requests.is_empty()
            && (st.receiving
                || st.responses > 0
                || (st.processing > 0 && st.processing > st.waiting))
        {
            self.log_state(&st, "wait_for_request");
            self.cond.notify_one();
            st = self
                .cond
                .wait(st)
                .expect("BUG: multiplexer mutex poisoned");
        }
        if !st.open {
            return Err(Error::Closed);
        }
        if let Some(request) = st.requests.pop_back() {
            st.processing += 1;
            self.cond.notify_one();
            return Ok(Some(request));
        }

        st.receiving = true;
        drop(st);
        let received = self.recv();
        let mut st = self.state();
        st.receiving = false;
        match received {
            Err(e) => {
                self.cond.notify_all();
                Err(e)
            }
            Ok(msg) if msg.target != 0 => {
                // Routed message: park it in the addressee's slot
                let state = &mut *st;
                match state.threads.get_mut(&msg.target) {
                    Some(ts) => {
                        state.responses += 1;
                        ts.response = Some(msg);
                        self.cond.notify_all();
                        Ok(None)
                    }
                    None => {
                        let target = msg.target;
                        self.cond.notify_all();
                        drop(st);
                        Err(self.fatal(Error::protocol(format!(
                            "message addressed to unknown thread {}",
                            target
                        ))))
                    }
                }
            }
            Ok(msg) => {
                if st.open {
                    st.processing += 1;
                }
                self.cond.notify_one();
                Ok(Some(msg))
            }
        }
    }

    /// Wait until a message is routed to `me`, reading from the stream if
    /// the gate admits us. `Ok(None)` means "keep waiting".
    fn wait_for_response(self: &Arc<Self>, me: ThreadId) -> Result<Option<Message>> {
        let mut st = self.state();
        while st.open
            && st.threads.get(&me).map_or(true, |ts| ts.response.is_none())
            && (st.receiving || (st.processing > 0 && st.processing > st.waiting))
        {
            self.log_state(&st, "wait_for_response");
            self.cond.notify_one();
            st = self
                .cond
                .wait(st)
                .expect("BUG: multiplexer mutex poisoned");
        }

        let has_response = st.threads.get(&me).map_or(false, |ts| ts.response.is_some());
        let mut routed_err = None;
        if !has_response && st.open {
            st.receiving = true;
            drop(st);
            let received = self.recv();
            st = self.state();
            st.receiving = false;
            match received {
                Err(e) => routed_err = Some(e),
                Ok(msg) if msg.target == 0 => st.requests.push_front(msg),
                Ok(msg) if msg.target == me => {
                    st.thread(me).response = Some(msg);
                }
                Ok(msg) => {
                    let state = &mut *st;
                    match state.threads.get_mut(&msg.target) {
                        Some(ts) => {
                            ts.response = Some(msg);
                            state.responses += 1;
                        }
                        None => {
                            routed_err = Some(Error::protocol(format!(
                                "message addressed to unknown thread {}",
                                msg.target
                            )))
                        }
                    }
                }
            }
        } else if st.open {
            // Consuming a response another thread routed to us
            st.responses -= 1;
        }

        if let Some(e) = routed_err {
            self.cond.notify_all();
            drop(st);
            return Err(match e {
                e @ Error::Protocol(_) => self.fatal(e),
                other => other,
            });
        }

        let msg = st.threads.get_mut(&me).and_then(|ts| ts.response.take());
        match &msg {
            Some(m) => {
                if !m.kind.is_response() {
                    // We became a request handler
                    st.processing += 1;
                } else if st.threads.get(&me).map_or(0, |ts| ts.request_count) > 0 {
                    // Our nested request completed; we resume processing
                    st.waiting -= 1;
                }
            }
            None => {
                if !st.open {
                    self.cond.notify_all();
                    return Err(Error::Closed);
                }
            }
        }
        self.cond.notify_all();
        Ok(msg)
    }

    /// Read frames while holding the reader seat. Delete messages are
    /// consumed here, before the next real message is returned.
    fn recv(self: &Arc<Self>) -> Result<Message> {
        let mut rx = self.rx.lock().expect("BUG: input stream mutex poisoned");
        loop {
            let msg = match rx.recv() {
                Ok(msg) => msg,
                Err(e) => {
                    drop(rx);
                    if !self.is_open() {
                        return Err(Error::Closed);
                    }
                    return Err(self.fatal(e));
                }
            };
            trace!(
                "connection {}: received {:?} {} -> {} ({} bytes)",
                self.connid,
                msg.kind,
                msg.source,
                msg.target,
                msg.payload.len()
            );
            if msg.kind == Kind::Delete {
                if let Err(e) = self.handle_delete(&msg) {
                    drop(rx);
                    return Err(self.fatal(e));
                }
                continue;
            }
            return Ok(msg);
        }
    }

    fn handle_delete(self: &Arc<Self>, msg: &Message) -> Result<()> {
        let pairs = match codec::decode_payload(self, &msg.payload)? {
            Value::Tuple(items) => items,
            _ => return Err(Error::protocol("malformed delete payload")),
        };
        let mut tables = self.tables.lock();
        for pair in pairs {
            match pair {
                Value::Tuple(kv) if kv.len() == 2 => {
                    let id = kv[0]
                        .as_int()
                        .map_err(|_| Error::protocol("malformed delete payload"))?;
                    let version = kv[1]
                        .as_int()
                        .map_err(|_| Error::protocol("malformed delete payload"))?;
                    tables.handle_delete(id as ObjectId, version as u64);
                }
                _ => return Err(Error::protocol("malformed delete payload")),
            }
        }
        Ok(())
    }

    /// Marshal and write one message. Pending deletes are announced
    /// first, so the peer processes reclamation before the request.
    fn send_message(self: &Arc<Self>, kind: Kind, args: &Value, target: ThreadId) -> Result<()> {
        self.flush_pending_deletes();
        let payload = codec::encode_payload(self, args)?;
        let msg = Message::new(kind, thread_ident(), target, payload);
        trace!(
            "connection {}: sending {:?} {} -> {} ({} bytes)",
            self.connid,
            msg.kind,
            msg.source,
            msg.target,
            msg.payload.len()
        );
        let mut tx = self.tx.lock().expect("BUG: output stream mutex poisoned");
        if let Err(e) = tx.send(msg) {
            drop(tx);
            return Err(self.fatal(e));
        }
        Ok(())
    }

    /// Announce pending proxy reclamations if the GC interval elapsed.
    /// Failures here happen during teardown and are logged, not raised.
    fn flush_pending_deletes(self: &Arc<Self>) {
        if !self.is_open() {
            return;
        }
        let due = match self.pending.take_due(self.gc_interval()) {
            Some(due) => due,
            None => return,
        };
        debug!(
            "connection {}: announcing {} reclaimed proxies",
            self.connid,
            due.len()
        );
        let args = Value::Tuple(
            due.iter()
                .map(|(id, version)| {
                    Value::Tuple(vec![Value::Int(*id as i64), Value::Int(*version as i64)])
                })
                .collect(),
        );
        let sent = codec::encode_payload(self, &args).and_then(|payload| {
            let msg = Message::new(Kind::Delete, 0, 0, payload);
            self.tx
                .lock()
                .expect("BUG: output stream mutex poisoned")
                .send(msg)
        });
        if let Err(e) = sent {
            warn!("connection {}: delete announcement failed: {}", self.connid, e);
        }
    }

    /// Process one message on the calling thread: decode, dispatch if it
    /// is a request (sending the response or exception back), unwrap if
    /// it is a response.
    fn handle(self: &Arc<Self>, msg: Message) -> Result<Value> {
        let me = thread_ident();
        let is_request = !msg.kind.is_response();
        if is_request {
            let mut st = self.state();
            let ts = st.thread(me);
            ts.request_count += 1;
            if ts.request_count == 1 {
                ts.peer_thread = msg.source;
            }
        }
        let out = self.handle_inner(&msg);
        if is_request {
            let mut st = self.state();
            let ts = st.thread(me);
            ts.request_count -= 1;
            if ts.request_count == 0 {
                ts.peer_thread = 0;
            }
        }
        out
    }

    fn handle_inner(self: &Arc<Self>, msg: &Message) -> Result<Value> {
        let args = match codec::decode_payload(self, &msg.payload) {
            Ok(args) => args,
            Err(e @ Error::Protocol(_)) => return Err(self.fatal(e)),
            Err(e) => return Err(e),
        };
        match msg.kind {
            Kind::Response => Ok(args),
            Kind::Exception => Err(self.exception_from_value(args)),
            Kind::Delete => Err(self.fatal(Error::protocol("delete arrived as a routed message"))),
            kind => {
                let result = dispatch::dispatch(self, kind, args);
                // Let the reader seat move on before we write; the peer
                // may be mid-send towards us right now
                self.finish_processing();
                let target = self.current_peer_thread();
                match result {
                    Ok(value) => match self.send_message(Kind::Response, &value, target) {
                        Ok(()) => Ok(value),
                        Err(e @ Error::Io(_)) | Err(e @ Error::Closed) => Err(e),
                        Err(e) => {
                            // Response failed to marshal: report that
                            debug!(
                                "connection {}: response marshalling failed: {}",
                                self.connid, e
                            );
                            let exc = self.exception_value_from_error(&e);
                            self.send_message(Kind::Exception, &exc, target)?;
                            Ok(Value::Unit)
                        }
                    },
                    Err(e) if e.is_fatal() => Err(self.fatal(e)),
                    Err(e) => {
                        debug!("connection {}: handler raised: {}", self.connid, e);
                        let exc = self.exception_value_from_error(&e);
                        self.send_message(Kind::Exception, &exc, target)?;
                        Ok(Value::Unit)
                    }
                }
            }
        }
    }

    fn finish_processing(&self) {
        let mut st = self.state();
        st.processing = st
            .processing
            .checked_sub(1)
            .expect("BUG: processing count underflow");
        if st.processing == 0 {
            self.cond.notify_all();
        }
    }

    fn current_peer_thread(&self) -> ThreadId {
        let st = self.state();
        st.threads
            .get(&thread_ident())
            .map_or(0, |ts| ts.peer_thread)
    }

    /// An incoming Exception payload becomes an error on the requesting
    /// thread, so host-side error handling works unchanged.
    fn exception_from_value(&self, value: Value) -> Error {
        match value {
            Value::Proxy(proxy) => {
                let (class_name, message) = match proxy.ctor() {
                    Some(Value::Tuple(items)) if items.len() == 2 => {
                        match (&items[0], &items[1]) {
                            (Value::Str(class), Value::Str(message)) => {
                                (class.clone(), message.clone())
                            }
                            _ => ("Exception".to_string(), String::new()),
                        }
                    }
                    _ => ("Exception".to_string(), String::new()),
                };
                RemoteError {
                    class_name,
                    message,
                    proxy: Some(proxy),
                }
                .into()
            }
            Value::Object(obj) => match obj.obj() {
                // One of our own exception objects came back
                Obj::Exception(exc) => Error::Script(ScriptError::new(
                    static_exception_class(&exc.class_name),
                    exc.message.clone(),
                )),
                _ => RemoteError {
                    class_name: "Exception".to_string(),
                    message: ops::to_str(&Value::Object(obj.clone())).unwrap_or_default(),
                    proxy: None,
                }
                .into(),
            },
            other => RemoteError {
                class_name: "Exception".to_string(),
                message: ops::to_str(&other).unwrap_or_default(),
                proxy: None,
            }
            .into(),
        }
    }

    /// A handler error becomes a live exception object (or a
    /// back-reference, when the error originated at the peer).
    fn exception_value_from_error(self: &Arc<Self>, e: &Error) -> Value {
        match e {
            Error::Script(se) => Value::new_exception(
                se.class_name,
                se.message.clone(),
                format!("{}: {}", se.class_name, se.message),
            ),
            Error::Remote(re) => match &re.proxy {
                Some(proxy) if self.owns_proxy(proxy) => proxy.as_value(),
                _ => Value::new_exception(
                    re.class_name.clone(),
                    re.message.clone(),
                    format!("remote {}: {}", re.class_name, re.message),
                ),
            },
            other => Value::new_exception("RuntimeError", other.to_string(), other.to_string()),
        }
    }

    /// Remote evaluation; the entry point behind the client's `eval`,
    /// `execute` and the auto-importer.
    pub fn eval(self: &Arc<Self>, source: Value, globals: Value, locals: Value) -> Result<Value> {
        self.request(Kind::Evaluate, Value::Tuple(vec![source, globals, locals]))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn static_exception_class(name: &str) -> &'static str {
    WELL_KNOWN_EXCEPTIONS
        .iter()
        .find(|candidate| **candidate == name)
        .copied()
        .unwrap_or("RuntimeError")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::unserved_pair;

    #[test]
    fn test_thread_idents_are_stable_and_distinct() {
        let mine = thread_ident();
        assert_eq!(mine, thread_ident(), "ident must be stable per thread");
        assert_ne!(mine, 0);
        let other = std::thread::spawn(thread_ident).join().expect("join failed");
        assert_ne!(mine, other, "distinct threads get distinct idents");
    }

    #[test]
    fn test_close_is_idempotent_and_fails_requests() {
        let (conn, _peer) = unserved_pair();
        assert!(conn.is_open());
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        match conn.request(Kind::Evaluate, Value::Unit) {
            Err(Error::Closed) => (),
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[test]
    fn test_gc_knobs() {
        let (conn, _peer) = unserved_pair();
        assert!(conn.gc_enabled());
        conn.set_gc_enabled(false);
        assert!(!conn.gc_enabled());
        conn.set_gc_interval(Duration::from_millis(0));
        assert_eq!(conn.gc_interval(), Duration::from_millis(0));
    }
}
