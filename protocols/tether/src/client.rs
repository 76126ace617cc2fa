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

//! User-facing connection API.
//!
//! A [`Client`] owns one connection plus the thread serving the peer's
//! asynchronous requests, and offers remote evaluation, remote
//! compilation, the auto-importing module handle, file transfer, and the
//! reclamation knobs.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mux::{Connection, ConnectionStats};
use crate::ops;
use crate::proxy::Proxy;
use crate::transport::{self, StreamPair, Transport};
use crate::value::Value;

/// Connection options.
#[derive(Debug, Clone)]
pub struct Options {
    pub gc_enabled: bool,
    pub gc_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            gc_enabled: true,
            gc_interval: Duration::from_secs(5),
        }
    }
}

/// Open a connection to `"<transport>:<address>"`, e.g.
/// `"tcp:127.0.0.1:18861"`.
pub fn connect(target: &str, options: Options) -> Result<Client> {
    let mut transport = transport::create(target)?;
    let streams = transport.open()?;
    Ok(Client::over_with(streams, options, Some(transport)))
}

pub struct Client {
    conn: Arc<Connection>,
    serve: Mutex<Option<JoinHandle<()>>>,
    transport: Option<Box<dyn Transport>>,
    /// The peer's `import_module`, resolved once
    importer: Mutex<Option<Value>>,
}

impl Client {
    /// Build a client over an already opened stream pair (in-process
    /// peers, tests, custom transports).
    pub fn over(streams: StreamPair, options: Options) -> Client {
        Self::over_with(streams, options, None)
    }

    fn over_with(
        streams: StreamPair,
        options: Options,
        transport: Option<Box<dyn Transport>>,
    ) -> Client {
        let conn = Connection::over(streams);
        conn.set_gc_enabled(options.gc_enabled);
        conn.set_gc_interval(options.gc_interval);
        let serve_conn = conn.clone();
        let serve = thread::Builder::new()
            .name(format!("tether-serve-{}", conn.id()))
            .spawn(move || serve_conn.serve_forever())
            .expect("BUG: could not spawn serve thread");
        Client {
            conn,
            serve: Mutex::new(Some(serve)),
            transport,
            importer: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Evaluate an expression in the peer interpreter.
    pub fn eval(
        &self,
        source: &str,
        globals: Option<Value>,
        locals: Option<Value>,
    ) -> Result<Value> {
        self.conn.eval(
            Value::Str(source.to_string()),
            globals.unwrap_or(Value::Unit),
            locals.unwrap_or(Value::Unit),
        )
    }

    /// Evaluate a value: source text or a code proxy from [`Client::compile`].
    pub fn eval_value(
        &self,
        source: Value,
        globals: Option<Value>,
        locals: Option<Value>,
    ) -> Result<Value> {
        self.conn.eval(
            source,
            globals.unwrap_or(Value::Unit),
            locals.unwrap_or(Value::Unit),
        )
    }

    /// Compile source in the peer; returns a proxy to the peer-side code
    /// object, accepted by `eval_value` and `execute`.
    pub fn compile(&self, source: &str, mode: &str) -> Result<Value> {
        let compile = self
            .conn
            .eval(Value::Str("compile".into()), Value::Unit, Value::Unit)?;
        ops::call(
            &compile,
            vec![
                Value::Str(source.to_string()),
                Value::Str(mode.to_string()),
            ],
            vec![],
        )
    }

    /// Compile-then-evaluate shortcut for statement blocks.
    pub fn execute(
        &self,
        source: &str,
        globals: Option<Value>,
        locals: Option<Value>,
    ) -> Result<()> {
        let code = self.compile(source, "exec")?;
        self.eval_value(code, globals, locals)?;
        Ok(())
    }

    /// Auto-importing handle to the peer's modules.
    pub fn modules(&self) -> Modules<'_> {
        Modules { client: self }
    }

    fn importer(&self) -> Result<Value> {
        let mut cached = self
            .importer
            .lock()
            .expect("BUG: importer cache mutex poisoned");
        if cached.is_none() {
            *cached = Some(self.conn.eval(
                Value::Str("import_module".into()),
                Value::Unit,
                Value::Unit,
            )?);
        }
        Ok(cached.clone().expect("BUG: importer cache just filled"))
    }

    pub fn gc_enabled(&self) -> bool {
        self.conn.gc_enabled()
    }

    pub fn set_gc_enabled(&self, enabled: bool) {
        self.conn.set_gc_enabled(enabled);
    }

    pub fn gc_interval(&self) -> Duration {
        self.conn.gc_interval()
    }

    pub fn set_gc_interval(&self, interval: Duration) {
        self.conn.set_gc_interval(interval);
    }

    pub fn stats(&self) -> ConnectionStats {
        self.conn.stats()
    }

    /// Copy a local file to the peer. Uses the transport's fast path if
    /// it has one, the peer's fs module otherwise.
    pub fn put_file(&self, local: &Path, remote: &str) -> Result<()> {
        if let Some(transport) = &self.transport {
            if let Some(result) = transport.put_file(local, remote) {
                return result;
            }
        }
        let data = std::fs::read(local).map_err(Error::Io)?;
        let fs = self.modules().get("fs")?;
        let write_bytes = fs.get_attr("write_bytes")?;
        ops::call(
            &write_bytes,
            vec![Value::Str(remote.to_string()), Value::Bytes(data)],
            vec![],
        )?;
        Ok(())
    }

    /// Copy a file from the peer to a local path.
    pub fn get_file(&self, remote: &str, local: &Path) -> Result<()> {
        if let Some(transport) = &self.transport {
            if let Some(result) = transport.get_file(remote, local) {
                return result;
            }
        }
        let fs = self.modules().get("fs")?;
        let read_bytes = fs.get_attr("read_bytes")?;
        match ops::call(&read_bytes, vec![Value::Str(remote.to_string())], vec![])? {
            Value::Bytes(data) => std::fs::write(local, data).map_err(Error::Io),
            other => Err(Error::protocol(format!(
                "read_bytes returned '{}'",
                other.type_name()
            ))),
        }
    }

    /// Shut the connection down and join the serve thread.
    pub fn close(&self) {
        self.conn.close();
        if let Some(handle) = self
            .serve
            .lock()
            .expect("BUG: serve handle mutex poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Attribute-style access to the peer's modules; each lookup runs the
/// peer's importer (resolved once per connection).
pub struct Modules<'a> {
    client: &'a Client,
}

impl<'a> Modules<'a> {
    /// Import `name` (dotted names traverse submodules) and return the
    /// module proxy.
    pub fn get(&self, name: &str) -> Result<Proxy> {
        let importer = self.client.importer()?;
        match ops::call(&importer, vec![Value::Str(name.to_string())], vec![])? {
            Value::Proxy(proxy) => Ok(proxy),
            other => Err(Error::protocol(format!(
                "importer returned '{}' instead of a module proxy",
                other.type_name()
            ))),
        }
    }
}
