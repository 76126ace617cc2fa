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

//! End-to-end scenarios over an in-process peer pair: remote evaluation,
//! module proxies, container mutation, identity preservation, exception
//! fidelity, remote compilation, file transfer and graceful close.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tether::ops;
use tether::test_utils::connected_pair;
use tether::{Error, Proxy, Value};

fn as_proxy(value: Value) -> Proxy {
    match value {
        Value::Proxy(proxy) => proxy,
        other => panic!("expected a proxy, got {:?}", other),
    }
}

#[test]
fn test_echo() {
    let (a, _b) = connected_pair();
    assert_eq!(a.eval("1+1", None, None).unwrap(), Value::Int(2));
    assert_eq!(
        a.eval("'hi'*3", None, None).unwrap(),
        Value::Str("hihihi".to_string())
    );
    assert_eq!(
        a.eval("(1, 'two', None)", None, None).unwrap(),
        Value::Tuple(vec![Value::Int(1), Value::Str("two".into()), Value::Unit])
    );
}

#[test]
fn test_module_proxy_getpid() {
    let (a, _b) = connected_pair();
    let os = a.modules().get("os").expect("import os failed");
    let getpid = os.get_attr("getpid").expect("os.getpid missing");
    let pid = ops::call(&getpid, vec![], vec![]).expect("getpid call failed");
    // Loopback peers share the process
    assert_eq!(pid, Value::Int(std::process::id() as i64));
}

#[test]
fn test_mutable_container() {
    let (a, _b) = connected_pair();
    let sys = a.modules().get("sys").expect("import sys failed");
    let path = as_proxy(sys.get_attr("path").expect("sys.path missing"));
    let initial_len = path.len().expect("len failed");

    let append = path.get_attr("append").expect("append missing");
    ops::call(&append, vec![Value::Str("!".into())], vec![]).expect("append failed");
    assert_eq!(path.len().unwrap(), initial_len + 1);
    assert_eq!(
        path.get_item(Value::Int(-1)).unwrap(),
        Value::Str("!".into())
    );

    // The mutation is visible in the owning interpreter
    assert_eq!(
        a.eval("import_module('sys').path[-1]", None, None).unwrap(),
        Value::Str("!".into())
    );

    let pop = path.get_attr("pop").expect("pop missing");
    assert_eq!(
        ops::call(&pop, vec![], vec![]).unwrap(),
        Value::Str("!".into())
    );
    assert_eq!(path.len().unwrap(), initial_len);
}

#[test]
fn test_remote_iteration() {
    let (a, _b) = connected_pair();
    let xs = as_proxy(
        a.eval("[10, 20, 30]", None, None)
            .expect("list literal failed"),
    );
    let items: Result<Vec<Value>, Error> = xs.iter().expect("iter failed").collect();
    assert_eq!(
        items.unwrap(),
        vec![Value::Int(10), Value::Int(20), Value::Int(30)]
    );
    assert!(xs.contains(Value::Int(20)).unwrap());
    assert!(!xs.contains(Value::Int(99)).unwrap());
}

#[test]
fn test_identity_preservation() {
    let (a, _b) = connected_pair();
    let list = Value::new_list(vec![Value::Int(7)]);
    let locals = Value::new_dict();
    ops::set_item(&locals, &Value::Str("x".into()), list.clone()).unwrap();

    // The peer resolves "x" out of our dict (getting a proxy to our
    // list) and returns it; what arrives back must be the same object
    let back = a.eval("x", None, Some(locals)).expect("eval failed");
    match (&back, &list) {
        (Value::Object(returned), Value::Object(original)) => {
            assert!(
                returned.same_object(original),
                "identity lost across the boundary"
            );
        }
        other => panic!("expected local objects, got {:?}", other),
    }
}

#[test]
fn test_proxy_deduplication() {
    let (a, _b) = connected_pair();
    let first = as_proxy(
        a.modules()
            .get("sys")
            .unwrap()
            .get_attr("path")
            .expect("sys.path missing"),
    );
    let second = as_proxy(
        a.modules()
            .get("sys")
            .unwrap()
            .get_attr("path")
            .expect("sys.path missing"),
    );
    assert_eq!(first.id(), second.id());
    assert_eq!(first, second, "same object id must yield the same proxy");
}

#[test]
fn test_exception_fidelity() {
    let (a, _b) = connected_pair();

    match a.eval("unknown_name", None, None) {
        Err(Error::Remote(e)) => {
            assert!(e.matches("NameError"), "wrong class: {}", e.class_name);
            assert!(
                e.message.contains("unknown_name"),
                "wrong message: {}",
                e.message
            );
            let traceback = e.traceback().expect("traceback fetch failed");
            assert!(traceback.contains("NameError"), "traceback: {}", traceback);
        }
        other => panic!("expected remote NameError, got {:?}", other.map(|_| ())),
    }

    match a.eval("1/0", None, None) {
        Err(Error::Remote(e)) => assert!(e.matches("ZeroDivisionError")),
        other => panic!(
            "expected remote ZeroDivisionError, got {:?}",
            other.map(|_| ())
        ),
    }

    match a.eval("[1][5]", None, None) {
        Err(Error::Remote(e)) => assert!(e.matches("IndexError")),
        other => panic!("expected remote IndexError, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_str_and_repr_of_remote_objects() {
    let (a, _b) = connected_pair();
    let xs = as_proxy(a.eval("[1, 'two']", None, None).unwrap());
    assert_eq!(xs.repr_value().unwrap(), "[1, 'two']");
    assert_eq!(xs.str_value().unwrap(), "[1, 'two']");

    let os = a.modules().get("os").unwrap();
    assert_eq!(os.repr_value().unwrap(), "<module 'os'>");
}

#[test]
fn test_compile_and_execute() {
    let (a, _b) = connected_pair();

    let code = a.compile("40 + 2", "eval").expect("compile failed");
    assert_eq!(a.eval_value(code, None, None).unwrap(), Value::Int(42));

    let locals = Value::new_dict();
    a.execute("x = 6\ny = 7 * x", None, Some(locals.clone()))
        .expect("execute failed");
    assert_eq!(
        ops::get_item(&locals, &Value::Str("y".into())).unwrap(),
        Value::Int(42)
    );

    match a.compile("1 +", "eval") {
        Err(Error::Remote(e)) => assert!(e.matches("SyntaxError")),
        other => panic!("expected remote SyntaxError, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_kwargs_travel() {
    let (a, _b) = connected_pair();
    let locals = Value::new_dict();
    let echo_kwargs = Value::native("echo_kwargs", |_, kwargs| {
        let mut names: Vec<String> = kwargs.into_iter().map(|(name, _)| name).collect();
        names.sort();
        Ok(Value::Str(names.join(",")))
    });
    ops::set_item(&locals, &Value::Str("f".into()), echo_kwargs).unwrap();
    assert_eq!(
        a.eval("f(1, b=2, a=3)", None, Some(locals)).unwrap(),
        Value::Str("a,b".into())
    );
}

#[test]
fn test_file_transfer_fallback() {
    let (a, _b) = connected_pair();
    let dir = std::env::temp_dir();
    let pid = std::process::id();
    let local_src = dir.join(format!("tether-test-src-{}.bin", pid));
    let remote = dir.join(format!("tether-test-remote-{}.bin", pid));
    let local_dst = dir.join(format!("tether-test-dst-{}.bin", pid));

    std::fs::write(&local_src, b"round trip payload").unwrap();
    a.put_file(&local_src, remote.to_str().unwrap())
        .expect("put_file failed");
    a.get_file(remote.to_str().unwrap(), &local_dst)
        .expect("get_file failed");
    assert_eq!(std::fs::read(&local_dst).unwrap(), b"round trip payload");

    let _ = std::fs::remove_file(&local_src);
    let _ = std::fs::remove_file(&remote);
    let _ = std::fs::remove_file(&local_dst);
}

#[test]
fn test_operator_mask_blocks_without_round_trip() {
    let (a, b) = connected_pair();
    let os = a.modules().get("os").unwrap();
    // Modules advertise no operators; the refusal is local
    let before = b.stats();
    match os.len() {
        Err(Error::Script(e)) => assert_eq!(e.class_name, "TypeError"),
        other => panic!("expected local TypeError, got {:?}", other.map(|_| ())),
    }
    assert_eq!(b.stats(), before, "capability probe must not hit the wire");
}

#[test]
fn test_graceful_close() {
    let (a, b) = connected_pair();
    let a = Arc::new(a);

    let worker = {
        let a = a.clone();
        thread::spawn(move || a.eval("import_module('time').sleep(1.0)", None, None))
    };
    // Let the request land on the peer first
    thread::sleep(Duration::from_millis(200));

    let start = Instant::now();
    a.close();
    match worker.join().expect("worker panicked") {
        Err(Error::Closed) => (),
        other => panic!("expected Closed, got {:?}", other.map(|_| ())),
    }
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "close did not unblock the waiter in bounded time"
    );

    // The peer unwinds once its handler finishes; join its serve thread
    b.close();
    assert!(start.elapsed() < Duration::from_secs(5));

    match a.eval("1", None, None) {
        Err(Error::Closed) => (),
        other => panic!("operations after close must fail, got {:?}", other.map(|_| ())),
    }
}
