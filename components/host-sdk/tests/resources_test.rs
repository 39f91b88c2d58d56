// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resource wrappers and asynchronous connection setup against the stub engine.

mod common;

use std::time::Duration;

use crt_host_sdk::io::{SocketDomain, SocketType, DEFAULT_MAX_HOSTS};
use crt_host_sdk::{
    BridgeError, ClientBootstrap, DefaultHostResolver, EventLoopGroup, HttpClientConnection,
    HttpClientConnectionOptions, SocketOptions,
};
use serial_test::serial;

const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Ownership chains
// ============================================================================

#[test]
#[serial]
fn test_bootstrap_pins_event_loop_group() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");

    let err = elg.release().unwrap_err();
    assert!(matches!(err, BridgeError::ResourceInUse { dependents: 1, .. }));
    assert!(common::destroyed().is_empty());

    bootstrap.release().expect("release bootstrap");
    elg.release().expect("release elg");
    assert_eq!(
        common::destroyed(),
        vec!["client bootstrap", "event loop group"]
    );
}

#[test]
#[serial]
fn test_drop_order_follows_ownership() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 2).expect("elg");
    let resolver = DefaultHostResolver::new(&module, &elg, DEFAULT_MAX_HOSTS).expect("resolver");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");
    assert_eq!(elg.handle().dependents(), 2);

    // Dropping the parent first only defers its destroy.
    drop(elg);
    assert!(common::destroyed().is_empty());
    drop(resolver);
    drop(bootstrap);
    assert_eq!(
        common::destroyed(),
        vec!["host resolver", "client bootstrap", "event loop group"]
    );
}

#[test]
#[serial]
fn test_released_parent_cannot_be_built_on() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    elg.release().expect("release");
    elg.release().expect("second release is a no-op");
    assert_eq!(common::destroyed(), vec!["event loop group"]);

    let err = ClientBootstrap::new(&module, &elg).unwrap_err();
    assert!(matches!(err, BridgeError::ResourceReleased { .. }));
}

#[test]
#[serial]
fn test_invalid_constructor_arguments() {
    let module = common::engine();
    assert!(EventLoopGroup::new(&module, -1).is_err());
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    assert!(matches!(
        DefaultHostResolver::new(&module, &elg, 0),
        Err(BridgeError::InvalidArgument { .. })
    ));
}

#[test]
#[serial]
fn test_socket_options_write_through() {
    let module = common::engine();
    let options = SocketOptions::new(&module).expect("socket options");
    assert_eq!(options.domain(), Ok(SocketDomain::IPv4));
    assert_eq!(options.socket_type(), Ok(SocketType::Stream));
    assert_eq!(options.connect_timeout_ms(), Ok(3000));
    assert_eq!(options.keep_alive(), Ok(false));

    options.set_domain(SocketDomain::IPv6).unwrap();
    options.set_connect_timeout_ms(1500).unwrap();
    options.set_keep_alive(30, 10).unwrap();

    let raw = options.get().unwrap();
    assert_eq!(raw.domain, SocketDomain::IPv6 as i32);
    assert_eq!(raw.connect_timeout_ms, 1500);
    assert!(raw.keepalive);
    assert_eq!(raw.keep_alive_interval_sec, 30);
    assert_eq!(raw.keep_alive_timeout_sec, 10);

    options.disable_keep_alive().unwrap();
    assert_eq!(options.keep_alive(), Ok(false));

    options.release().unwrap();
    assert!(matches!(
        options.domain(),
        Err(BridgeError::ResourceReleased { .. })
    ));
}

// ============================================================================
// Connection setup
// ============================================================================

#[test]
#[serial]
fn test_connection_completes_on_engine_thread() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");
    let socket_options = SocketOptions::new(&module).expect("socket options");

    let options = HttpClientConnectionOptions::new(&bootstrap, "example.com", 443)
        .with_socket_options(&socket_options);
    let pending = HttpClientConnection::connect(&module, &options).expect("issued");

    // Setup in flight pins both parents.
    assert!(bootstrap.release().unwrap_err().is_protocol_misuse());
    assert!(socket_options.release().is_err());

    let connection = pending
        .get_timeout(SETUP_TIMEOUT)
        .expect("setup completes")
        .expect("setup succeeds");
    assert!(!connection.handle().is_released());

    // The connection itself now holds the parents.
    assert!(bootstrap.release().is_err());
    drop(pending);
    connection.release().expect("close connection");
    bootstrap.release().expect("bootstrap free after close");
    socket_options.release().expect("socket options free after close");

    let destroyed = common::destroyed();
    assert_eq!(destroyed[0], "http connection");
    assert!(destroyed.contains(&"client bootstrap"));
    assert!(destroyed.contains(&"socket options"));
}

#[test]
#[serial]
fn test_connection_failure_is_described() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");

    let options = HttpClientConnectionOptions::new(&bootstrap, common::UNREACHABLE_HOST, 80);
    let pending = HttpClientConnection::connect(&module, &options).expect("issued");

    let (tx, rx) = std::sync::mpsc::channel();
    pending
        .on_failure(move |e| tx.send(e).unwrap())
        .expect("observer");

    let err = pending
        .get_timeout(SETUP_TIMEOUT)
        .expect("setup completes")
        .unwrap_err();
    match &err {
        BridgeError::Completion(call_error) => {
            assert_eq!(call_error.code, common::ERROR_SOCKET_TIMEOUT);
            assert_eq!(call_error.name, "CRT_IO_SOCKET_TIMEOUT");
        }
        other => panic!("expected a completion error, got {other:?}"),
    }
    assert_eq!(rx.recv_timeout(SETUP_TIMEOUT), Ok(err));

    // A failed setup releases its pins.
    bootstrap.release().expect("bootstrap unpinned");
}

#[test]
#[serial]
fn test_immediate_error_fails_the_result() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");

    let options = HttpClientConnectionOptions::new(&bootstrap, common::REJECTED_HOST, 80);
    let pending = HttpClientConnection::connect(&module, &options).expect("issued");

    assert!(pending.is_complete());
    assert!(matches!(pending.get(), Err(BridgeError::Foreign(_))));
    bootstrap.release().expect("bootstrap unpinned");
}

#[test]
#[serial]
fn test_connection_options_are_validated() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");

    let no_port = HttpClientConnectionOptions::new(&bootstrap, "example.com", 0);
    assert!(matches!(
        HttpClientConnection::connect(&module, &no_port),
        Err(BridgeError::InvalidArgument { .. })
    ));
    let no_host = HttpClientConnectionOptions::new(&bootstrap, "", 443);
    assert!(HttpClientConnection::connect(&module, &no_host).is_err());
    assert_eq!(bootstrap.handle().dependents(), 0);
}

#[tokio::test]
#[serial]
async fn test_connection_can_be_awaited() {
    let module = common::engine();
    let elg = EventLoopGroup::new(&module, 1).expect("elg");
    let bootstrap = ClientBootstrap::new(&module, &elg).expect("bootstrap");

    let options = HttpClientConnectionOptions::new(&bootstrap, "example.com", 8080);
    let pending = HttpClientConnection::connect(&module, &options).expect("issued");

    let connection = tokio::time::timeout(SETUP_TIMEOUT, pending.wait())
        .await
        .expect("setup completes")
        .expect("setup succeeds");
    assert_eq!(pending.get().map(|c| c.handle().kind()), Ok("http connection"));
    drop(connection);
}
