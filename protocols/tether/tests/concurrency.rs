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

//! Nested calls, progress under concurrent load, and distributed
//! reclamation.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tether::ops;
use tether::test_utils::{connected_pair, connected_pair_with};
use tether::{Options, Value};

/// Build a `locals` dict holding a counter-updating callable under `"f"`.
fn callback_locals(seen: Arc<Mutex<Vec<thread::ThreadId>>>) -> Value {
    let locals = Value::new_dict();
    let f = Value::native("increment", move |args, _| {
        seen.lock().expect("seen mutex poisoned").push(thread::current().id());
        let x = args
            .first()
            .cloned()
            .unwrap_or(Value::Int(0))
            .as_int()?;
        Ok(Value::Int(x + 1))
    });
    ops::set_item(&locals, &Value::Str("f".into()), f).expect("set_item failed");
    locals
}

#[test]
fn test_nested_callback_on_originating_thread() {
    let (a, _b) = connected_pair();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let locals = callback_locals(seen.clone());

    // The peer resolves and calls "f" five times while our eval is in
    // flight; every call must be dispatched inline on this very thread
    let result = a
        .eval("f(f(f(f(f(0)))))", None, Some(locals))
        .expect("nested eval failed");
    assert_eq!(result, Value::Int(5));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5, "callback must run exactly five times");
    let me = thread::current().id();
    assert!(
        seen.iter().all(|id| *id == me),
        "callback strayed off the originating thread"
    );
}

#[test]
fn test_mutual_recursion() {
    let (a, _b) = connected_pair();
    let locals = Value::new_dict();
    // ping(n) asks the peer to evaluate "n" against the same locals;
    // each round trips through both connections
    {
        let locals_inner = locals.clone();
        let conn = a.connection().clone();
        let ping = Value::native("ping", move |args, _| {
            let n = args.first().cloned().unwrap_or(Value::Int(0)).as_int()?;
            if n <= 0 {
                return Ok(Value::Int(0));
            }
            let next = conn.eval(
                Value::Str(format!("ping({})", n - 1)),
                Value::Unit,
                locals_inner.clone(),
            )?;
            Ok(Value::Int(next.as_int()? + 1))
        });
        ops::set_item(&locals, &Value::Str("ping".into()), ping).expect("set_item failed");
    }
    let result = a
        .eval("ping(4)", None, Some(locals))
        .expect("mutual recursion failed");
    assert_eq!(result, Value::Int(4));
}

#[test]
fn test_progress_under_full_load() {
    let (a, b) = connected_pair();
    let a = Arc::new(a);
    let b = Arc::new(b);

    let mut workers = Vec::new();
    for side in 0..2 {
        for worker in 0..3 {
            let client = if side == 0 { a.clone() } else { b.clone() };
            workers.push(thread::spawn(move || {
                for round in 0..5 {
                    let seen = Arc::new(Mutex::new(Vec::new()));
                    let locals = callback_locals(seen);
                    let result = client
                        .eval("f(f(0)) + f(10)", None, Some(locals))
                        .unwrap_or_else(|e| {
                            panic!("worker {}/{} round {} failed: {}", side, worker, round, e)
                        });
                    assert_eq!(result, Value::Int(13));
                }
            }));
        }
    }
    for worker in workers {
        worker.join().expect("worker deadlocked or panicked");
    }
}

#[test]
fn test_reclamation_with_zero_interval() {
    let (a, b) = connected_pair_with(
        Options {
            gc_enabled: true,
            gc_interval: Duration::from_secs(0),
        },
        Options::default(),
    );

    let path_id = {
        let sys = a.modules().get("sys").expect("import sys failed");
        let path = match sys.get_attr("path").expect("sys.path missing") {
            Value::Proxy(p) => p,
            other => panic!("expected proxy, got {:?}", other),
        };
        let id = path.id();
        assert!(
            b.connection().exported_object_ids().contains(&id),
            "peer must hold the export while our proxy lives"
        );
        id
        // proxy (and the sys module proxy) reclaimed here
    };

    // The next outbound request flushes the pending delete first; by the
    // time the response arrives the peer has processed it
    assert_eq!(a.eval("1", None, None).unwrap(), Value::Int(1));
    assert!(
        !b.connection().exported_object_ids().contains(&path_id),
        "peer kept a reclaimed export"
    );
}

#[test]
fn test_gc_disabled_retains_exports() {
    let (a, b) = connected_pair_with(
        Options {
            gc_enabled: false,
            gc_interval: Duration::from_secs(0),
        },
        Options::default(),
    );

    let path_id = {
        let sys = a.modules().get("sys").expect("import sys failed");
        match sys.get_attr("path").expect("sys.path missing") {
            Value::Proxy(p) => p.id(),
            other => panic!("expected proxy, got {:?}", other),
        }
    };
    assert_eq!(a.eval("1", None, None).unwrap(), Value::Int(1));
    assert!(
        b.connection().exported_object_ids().contains(&path_id),
        "with GC disabled nothing may be reclaimed"
    );
}
