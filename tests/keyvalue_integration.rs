//! End-to-end coverage over real TCP loopback sockets, exercising the
//! worked example service in `demos/keyvalue_service.rs` against the
//! literal scenarios laid out in `spec.md` §8.

#[path = "../demos/keyvalue_service.rs"]
mod keyvalue_service;

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyvalue_service::{
    serve_tcp, push_on_key_changed, InOutData, KeyChangeEvent, KeyChangeType, KeyValueClient,
    KeyValueService, MessageIds, TestStruct,
};
use rpc_runtime::Client;

struct Echo;

impl KeyValueService for Echo {
    fn test_int(&self, i8v: i8, u8v: u8, i16v: i16, u16v: u16, i32v: i32, u32v: u32, i64v: i64, u64v: u64) -> i32 {
        let _ = (i8v, u8v, i16v, u16v, u32v, i64v, u64v);
        i32v + 1000
    }

    fn test_floats(&self, f: f32, d: f64) -> f64 {
        f as f64 + d
    }

    fn test_string(&self, s: String) -> String {
        format!("Echo: {s}")
    }

    fn test_struct(&self, s: TestStruct) -> TestStruct {
        TestStruct {
            i32_field: s.i32_field + 100,
            i64_field: s.i64_field + 1000,
        }
    }

    fn test_in_out_params(
        &self,
        value: i32,
        str_: String,
        data: InOutData,
        seq: Vec<i32>,
    ) -> (i32, String, InOutData, Vec<i32>) {
        (
            value * 2,
            format!("{str_}_modified"),
            InOutData {
                i32_field: data.i32_field + 999,
            },
            seq.into_iter().map(|v| v + 100).collect(),
        )
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn spawn_server(port: u16) -> (Arc<rpc_runtime::Server>, MessageIds, std::thread::JoinHandle<()>) {
    let ids = MessageIds::new();
    let server = Arc::new(serve_tcp(("127.0.0.1", port), &ids, Arc::new(Echo)).unwrap());
    let run_handle = {
        let server = Arc::clone(&server);
        std::thread::spawn(move || server.run().unwrap())
    };
    std::thread::sleep(Duration::from_millis(50));
    (server, ids, run_handle)
}

#[test]
fn scenario_integer_echo() {
    let port = free_port();
    let (server, ids, run_handle) = spawn_server(port);

    let client = KeyValueClient::new(Client::connect_tcp(("127.0.0.1", port)).unwrap(), ids);
    let result = client.test_int(1, 2, 3, 4, 5, 6, 7, 8);
    assert_eq!(result, 1005);

    client.stop_listening();
    server.stop();
    let _ = run_handle.join();
}

#[test]
fn scenario_float_sum() {
    let port = free_port();
    let (server, ids, run_handle) = spawn_server(port);

    let client = KeyValueClient::new(Client::connect_tcp(("127.0.0.1", port)).unwrap(), ids);
    let result = client.test_floats(3.14f32, 2.718f64);
    assert!((result - 5.858).abs() < 0.01, "got {result}");

    client.stop_listening();
    server.stop();
    let _ = run_handle.join();
}

#[test]
fn scenario_string_echo() {
    let port = free_port();
    let (server, ids, run_handle) = spawn_server(port);

    let client = KeyValueClient::new(Client::connect_tcp(("127.0.0.1", port)).unwrap(), ids);
    let result = client.test_string("Hello World");
    assert_eq!(result, "Echo: Hello World");

    client.stop_listening();
    server.stop();
    let _ = run_handle.join();
}

#[test]
fn scenario_struct_mutation() {
    let port = free_port();
    let (server, ids, run_handle) = spawn_server(port);

    let client = KeyValueClient::new(Client::connect_tcp(("127.0.0.1", port)).unwrap(), ids);
    let result = client.test_struct(TestStruct {
        i32_field: 100,
        i64_field: 1000,
    });
    assert_eq!(result.i32_field, 200);
    assert_eq!(result.i64_field, 2000);

    client.stop_listening();
    server.stop();
    let _ = run_handle.join();
}

#[test]
fn scenario_in_out_params() {
    let port = free_port();
    let (server, ids, run_handle) = spawn_server(port);

    let client = KeyValueClient::new(Client::connect_tcp(("127.0.0.1", port)).unwrap(), ids);
    let result = client.test_in_out_params(100, "test", InOutData { i32_field: 50 }, vec![1, 2, 3]);
    assert_eq!(result.value, 200);
    assert_eq!(result.str_, "test_modified");
    assert_eq!(result.data.i32_field, 1049);
    assert_eq!(result.seq, vec![101, 102, 103]);

    client.stop_listening();
    server.stop();
    let _ = run_handle.join();
}

#[test]
fn scenario_push_delivery_to_two_clients() {
    let port = free_port();
    let (server, ids, run_handle) = spawn_server(port);

    let counts: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let make_client = || KeyValueClient::new(Client::connect_tcp(("127.0.0.1", port)).unwrap(), MessageIds::new());

    let client_a = make_client();
    let client_b = make_client();

    for client in [&client_a, &client_b] {
        let counts = Arc::clone(&counts);
        let calls = Arc::clone(&calls);
        client.on_key_changed(Arc::new(move |payload: &[u8]| {
            counts.lock().unwrap().push(payload.to_vec());
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Give both clients' listener threads a moment to be ready to receive.
    std::thread::sleep(Duration::from_millis(50));

    let event = KeyChangeEvent {
        change_type: KeyChangeType::KeyAdded,
        key: "name".to_string(),
        old_value: "".to_string(),
        new_value: "Alice".to_string(),
        timestamp: 1234,
    };
    push_on_key_changed(&server, &ids, &event, None).unwrap();

    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let payloads = counts.lock().unwrap();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0], payloads[1]);

    client_a.stop_listening();
    client_b.stop_listening();
    server.stop();
    let _ = run_handle.join();
}
