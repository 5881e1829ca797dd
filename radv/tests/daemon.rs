//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use radv::config::{
    Config, DnsslConfig, InterfaceConfig, Nat64PrefixConfig, PrefixConfig,
    RdnssConfig, RouteConfig,
};
use radv::daemon::Daemon;
use radv::device::DeviceState;
use radv::error::Error;
use radv::hw_addr::HwAddr;
use radv::packet::{NdOption, RouterPreference, RouterSolicitation};
use radv::testing::{FakeDeviceWatcher, FakeSocket, FakeSocketRegistry};
use radv::worker::WorkerState;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(1);
const CADENCE_TOLERANCE: Duration = Duration::from_millis(60);

//
// Helper functions.
//

fn net0_mac() -> HwAddr {
    [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77].into()
}

fn net1_mac() -> HwAddr {
    [0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff].into()
}

fn device_up(addr: HwAddr) -> DeviceState {
    DeviceState {
        is_up: true,
        addr: Some(addr),
    }
}

// Configuration used by the happy-path scenario: net0 with the full
// option set, net1 with the bare minimum.
fn happy_path_config() -> Config {
    Config {
        interfaces: vec![
            InterfaceConfig {
                name: "net0".to_owned(),
                ra_interval_milliseconds: 100,
                current_hop_limit: 10,
                managed: true,
                other: true,
                preference: RouterPreference::High,
                router_lifetime_seconds: 10,
                reachable_time_milliseconds: 10000,
                retransmit_time_milliseconds: 10000,
                mtu: 1500,
                prefixes: vec![PrefixConfig {
                    prefix: "fd00::/64".parse().unwrap(),
                    on_link: true,
                    autonomous: true,
                    preferred_lifetime_seconds: Some(100),
                    valid_lifetime_seconds: Some(200),
                }],
                routes: vec![
                    RouteConfig {
                        prefix: "2001:db8::/64".parse().unwrap(),
                        preference: RouterPreference::Low,
                        lifetime_seconds: 100,
                    },
                    RouteConfig {
                        prefix: "2001:db8:1::/64".parse().unwrap(),
                        preference: RouterPreference::High,
                        lifetime_seconds: 200,
                    },
                ],
                rdnsses: vec![RdnssConfig {
                    lifetime_seconds: 300,
                    addresses: vec![
                        "2001:db8::1".parse().unwrap(),
                        "2001:db8::2".parse().unwrap(),
                    ],
                }],
                dnssls: vec![DnsslConfig {
                    lifetime_seconds: 400,
                    domain_names: vec![
                        "example.com".to_owned(),
                        "foo.example.com".to_owned(),
                    ],
                }],
                nat64_prefixes: vec![Nat64PrefixConfig {
                    prefix: "64:ff9b::/96".parse().unwrap(),
                    lifetime_seconds: Some(1800),
                }],
            },
            InterfaceConfig {
                name: "net1".to_owned(),
                ra_interval_milliseconds: 100,
                ..Default::default()
            },
        ],
    }
}

async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + EVENTUALLY_TIMEOUT;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
}

async fn get_sock(
    registry: &FakeSocketRegistry,
    ifname: &str,
) -> Arc<FakeSocket> {
    let deadline = Instant::now() + EVENTUALLY_TIMEOUT;
    loop {
        if let Some(sock) = registry.get(ifname) {
            return sock;
        }
        assert!(
            Instant::now() < deadline,
            "socket for {ifname} was not created in time"
        );
        time::sleep(Duration::from_millis(10)).await;
    }
}

// Drops the backlog, then checks that the next three advertisements
// arrive with the expected cadence.
async fn advert_interval_is(sock: &FakeSocket, expected: Duration) -> bool {
    sock.drain_multicast().await;
    let mut tstamps = Vec::new();
    for _ in 0..3 {
        match time::timeout(Duration::from_secs(1), sock.recv_multicast())
            .await
        {
            Ok(Some(advert)) => tstamps.push(advert.tstamp),
            _ => return false,
        }
    }
    tstamps.windows(2).all(|pair| {
        let delta = pair[1] - pair[0];
        let error = delta
            .checked_sub(expected)
            .unwrap_or_else(|| expected - delta);
        error <= CADENCE_TOLERANCE
    })
}

async fn assert_advert_interval(sock: &FakeSocket, expected: Duration) {
    // Retried so advertisements queued at the previous cadence are ridden
    // out after a reload.
    for _ in 0..5 {
        if advert_interval_is(sock, expected).await {
            return;
        }
    }
    panic!("advert cadence never settled at {expected:?}");
}

fn find_lladdr(options: &[NdOption]) -> Option<&HwAddr> {
    options.iter().find_map(|option| match option {
        NdOption::SourceLinkLayerAddress(addr) => Some(addr),
        _ => None,
    })
}

//
// Tests.
//

#[tokio::test]
async fn test_daemon_happy_path() {
    let config = happy_path_config();
    let registry = FakeSocketRegistry::new();
    let watcher = FakeDeviceWatcher::new();
    watcher.update("net0", device_up(net0_mac()));
    watcher.update("net1", device_up(net1_mac()));

    let daemon = Arc::new(
        Daemon::new(config)
            .unwrap()
            .with_socket_provider(registry.clone())
            .with_device_watcher(watcher.clone()),
    );
    let cancel = CancellationToken::new();
    let run_task = tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });

    // Both sockets are created.
    let sock0 = get_sock(&registry, "net0").await;
    let sock1 = get_sock(&registry, "net1").await;

    // Unsolicited advertisements are sent with the configured interval.
    assert_advert_interval(&sock0, Duration::from_millis(100)).await;
    assert_advert_interval(&sock1, Duration::from_millis(100)).await;

    // The RA parameters are reflected in the packet, in order.
    let advert = time::timeout(Duration::from_secs(1), sock0.recv_multicast())
        .await
        .expect("no advertisement within 1s")
        .expect("socket channel closed");
    let msg = advert.msg;
    assert_eq!(msg.cur_hop_limit, 10);
    assert!(msg.managed);
    assert!(msg.other);
    assert_eq!(msg.preference, RouterPreference::High);
    assert_eq!(msg.router_lifetime, 10);
    assert_eq!(msg.reachable_time, 10000);
    assert_eq!(msg.retrans_timer, 10000);
    assert_eq!(msg.options.len(), 8);
    assert!(matches!(msg.options[0], NdOption::Mtu(1500)));
    let NdOption::SourceLinkLayerAddress(lladdr) = &msg.options[1] else {
        panic!("missing source link-layer address option");
    };
    assert_eq!(*lladdr, net0_mac());
    let NdOption::PrefixInformation(pi) = &msg.options[2] else {
        panic!("missing prefix information option");
    };
    assert_eq!(pi.prefix, "fd00::/64".parse().unwrap());
    assert!(pi.on_link);
    assert!(pi.autonomous);
    assert_eq!(pi.preferred_lifetime, 100);
    assert_eq!(pi.valid_lifetime, 200);
    let NdOption::RouteInformation(route0) = &msg.options[3] else {
        panic!("missing route information option");
    };
    let NdOption::RouteInformation(route1) = &msg.options[4] else {
        panic!("missing route information option");
    };
    assert_eq!(route0.prefix, "2001:db8::/64".parse().unwrap());
    assert_eq!(route0.preference, RouterPreference::Low);
    assert_eq!(route0.lifetime, 100);
    assert_eq!(route1.prefix, "2001:db8:1::/64".parse().unwrap());
    assert_eq!(route1.preference, RouterPreference::High);
    assert_eq!(route1.lifetime, 200);
    let NdOption::RecursiveDnsServer(rdnss) = &msg.options[5] else {
        panic!("missing RDNSS option");
    };
    assert_eq!(rdnss.lifetime, 300);
    assert_eq!(
        rdnss.servers,
        vec![
            "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap(),
            "2001:db8::2".parse::<std::net::Ipv6Addr>().unwrap(),
        ]
    );
    let NdOption::DnsSearchList(dnssl) = &msg.options[6] else {
        panic!("missing DNSSL option");
    };
    assert_eq!(dnssl.lifetime, 400);
    assert_eq!(dnssl.domains, ["example.com", "foo.example.com"]);
    let NdOption::Pref64(pref64) = &msg.options[7] else {
        panic!("missing PREF64 option");
    };
    assert_eq!(pref64.prefix, "64:ff9b::/96".parse().unwrap());
    assert_eq!(pref64.lifetime, 1800);

    // The status is running, ordered by interface name.
    let status = daemon.status();
    assert_eq!(status.interfaces.len(), 2);
    assert_eq!(status.interfaces[0].name, "net0");
    assert_eq!(status.interfaces[1].name, "net1");
    assert_eq!(status.interfaces[0].state, WorkerState::Running);
    assert_eq!(status.interfaces[1].state, WorkerState::Running);

    // A MAC address change shows up in subsequent advertisements, without
    // a socket reopen.
    let new_mac: HwAddr = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x78].into();
    watcher.update("net0", device_up(new_mac.clone()));
    let deadline = Instant::now() + EVENTUALLY_TIMEOUT;
    loop {
        let advert = time::timeout_at(deadline, sock0.recv_multicast())
            .await
            .expect("advertisement with the new address never arrived")
            .expect("socket channel closed");
        match find_lladdr(&advert.msg.options) {
            Some(lladdr) if *lladdr == new_mac => break,
            _ => continue,
        }
    }
    assert!(Arc::ptr_eq(&sock0, &get_sock(&registry, "net0").await));

    // An interval change on reload retunes net1 and leaves net0 alone.
    let mut config = happy_path_config();
    config.interfaces[1].ra_interval_milliseconds = 200;
    daemon
        .reload(Instant::now() + Duration::from_secs(1), config.clone())
        .await
        .unwrap();
    assert_advert_interval(&sock0, Duration::from_millis(100)).await;
    assert_advert_interval(&sock1, Duration::from_millis(200)).await;

    // A solicitation is answered with a unicast advertisement.
    let from = "fe80::1".parse().unwrap();
    sock0.inject_rs(RouterSolicitation::default(), from);
    let unicast = time::timeout(Duration::from_secs(1), sock0.recv_unicast())
        .await
        .expect("no solicited advertisement within 1s")
        .expect("socket channel closed");
    assert_eq!(unicast.to, from);

    // Removing an interface from the configuration stops its worker and
    // closes its socket.
    config.interfaces.truncate(1);
    daemon
        .reload(Instant::now() + Duration::from_secs(1), config)
        .await
        .unwrap();
    assert!(eventually(|| sock1.is_closed()).await);
    assert!(!sock0.is_closed());
    assert_advert_interval(&sock0, Duration::from_millis(100)).await;
    assert_eq!(daemon.status().interfaces.len(), 1);

    // Cancelling the daemon closes every socket and ends run().
    cancel.cancel();
    assert!(eventually(|| sock0.is_closed() && sock1.is_closed()).await);
    time::timeout(Duration::from_secs(1), run_task)
        .await
        .expect("run did not return after cancellation")
        .unwrap();
}

#[tokio::test]
async fn test_daemon_rejects_invalid_config() {
    let config = Config {
        interfaces: vec![InterfaceConfig {
            name: "net0".to_owned(),
            ra_interval_milliseconds: 69,
            ..Default::default()
        }],
    };
    assert!(matches!(
        Daemon::new(config),
        Err(Error::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_reload_rejects_invalid_config() {
    let registry = FakeSocketRegistry::new();
    let watcher = FakeDeviceWatcher::new();
    watcher.update("net0", device_up(net0_mac()));

    let config = Config {
        interfaces: vec![InterfaceConfig {
            name: "net0".to_owned(),
            ra_interval_milliseconds: 100,
            ..Default::default()
        }],
    };
    let daemon = Arc::new(
        Daemon::new(config)
            .unwrap()
            .with_socket_provider(registry.clone())
            .with_device_watcher(watcher.clone()),
    );
    let cancel = CancellationToken::new();
    tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });
    let sock0 = get_sock(&registry, "net0").await;

    let bad = Config {
        interfaces: vec![InterfaceConfig {
            name: "net0".to_owned(),
            ra_interval_milliseconds: 1_800_001,
            ..Default::default()
        }],
    };
    let result = daemon
        .reload(Instant::now() + Duration::from_secs(1), bad)
        .await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));

    // The rejected configuration left the running worker untouched.
    assert!(!sock0.is_closed());
    assert_eq!(daemon.status().interfaces[0].state, WorkerState::Running);
    cancel.cancel();
}

#[tokio::test]
async fn test_reload_idempotent() {
    let registry = FakeSocketRegistry::new();
    let watcher = FakeDeviceWatcher::new();
    watcher.update("net0", device_up(net0_mac()));
    watcher.update("net1", device_up(net1_mac()));

    let daemon = Arc::new(
        Daemon::new(happy_path_config())
            .unwrap()
            .with_socket_provider(registry.clone())
            .with_device_watcher(watcher.clone()),
    );
    let cancel = CancellationToken::new();
    tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });
    let sock0 = get_sock(&registry, "net0").await;
    let sock1 = get_sock(&registry, "net1").await;

    // Reloading the identical configuration twice changes nothing: no
    // socket churn, same workers, same cadence.
    for _ in 0..2 {
        daemon
            .reload(
                Instant::now() + Duration::from_secs(1),
                happy_path_config(),
            )
            .await
            .unwrap();
    }
    assert!(Arc::ptr_eq(&sock0, &get_sock(&registry, "net0").await));
    assert!(Arc::ptr_eq(&sock1, &get_sock(&registry, "net1").await));
    assert!(!sock0.is_closed());
    assert!(!sock1.is_closed());
    assert_advert_interval(&sock0, Duration::from_millis(100)).await;
    assert_eq!(daemon.status().interfaces.len(), 2);
    cancel.cancel();
}

#[tokio::test]
async fn test_reload_deadline_exceeded() {
    let registry = FakeSocketRegistry::new();
    let watcher = FakeDeviceWatcher::new();
    watcher.update("net0", device_up(net0_mac()));
    watcher.update("net1", device_up(net1_mac()));

    let daemon = Arc::new(
        Daemon::new(happy_path_config())
            .unwrap()
            .with_socket_provider(registry.clone())
            .with_device_watcher(watcher.clone()),
    );
    let cancel = CancellationToken::new();
    tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });
    let sock1 = get_sock(&registry, "net1").await;

    // An already-expired deadline cannot cover the worker stop.
    let mut config = happy_path_config();
    config.interfaces.truncate(1);
    let result = daemon
        .reload(Instant::now() - Duration::from_millis(1), config)
        .await;
    assert!(matches!(result, Err(Error::ReloadDeadlineExceeded)));

    // The pending stop still completes in the background.
    assert!(eventually(|| sock1.is_closed()).await);
    cancel.cancel();
}

#[tokio::test]
async fn test_worker_failing_and_recovery() {
    let registry = FakeSocketRegistry::new();
    let watcher = FakeDeviceWatcher::new();
    registry.set_open_error("net0", "operation not permitted");
    watcher.update("net0", device_up(net0_mac()));

    let config = Config {
        interfaces: vec![InterfaceConfig {
            name: "net0".to_owned(),
            ra_interval_milliseconds: 100,
            ..Default::default()
        }],
    };
    let daemon = Arc::new(
        Daemon::new(config)
            .unwrap()
            .with_socket_provider(registry.clone())
            .with_device_watcher(watcher.clone()),
    );
    let cancel = CancellationToken::new();
    tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });

    // The worker surfaces the failure reason through the status.
    assert!(
        eventually(|| {
            let status = daemon.status();
            matches!(status.interfaces[0].state, WorkerState::Failing(_))
                && status
                    .interfaces[0]
                    .message
                    .as_deref()
                    .is_some_and(|message| !message.is_empty())
        })
        .await
    );

    // Once the open succeeds, the backoff retry brings it to Running.
    registry.clear_open_error("net0");
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if daemon.status().interfaces[0].state == WorkerState::Running {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "worker never recovered from the socket failure"
        );
        time::sleep(Duration::from_millis(50)).await;
    }
    assert!(registry.get("net0").is_some());
    cancel.cancel();
}

#[tokio::test]
async fn test_worker_waits_for_device() {
    let registry = FakeSocketRegistry::new();
    let watcher = FakeDeviceWatcher::new();
    watcher.update(
        "net0",
        DeviceState {
            is_up: false,
            addr: None,
        },
    );

    let config = Config {
        interfaces: vec![InterfaceConfig {
            name: "net0".to_owned(),
            ra_interval_milliseconds: 100,
            ..Default::default()
        }],
    };
    let daemon = Arc::new(
        Daemon::new(config)
            .unwrap()
            .with_socket_provider(registry.clone())
            .with_device_watcher(watcher.clone()),
    );
    let cancel = CancellationToken::new();
    tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });

    // No socket while the device is down; the worker keeps initializing.
    time::sleep(Duration::from_millis(200)).await;
    assert!(registry.get("net0").is_none());
    assert_eq!(
        daemon.status().interfaces[0].state,
        WorkerState::Initializing
    );

    // The device coming up opens the socket and sends the first
    // advertisement without waiting for a full interval.
    watcher.update("net0", device_up(net0_mac()));
    let sock0 = get_sock(&registry, "net0").await;
    let advert = time::timeout(
        Duration::from_millis(90),
        sock0.recv_multicast(),
    )
    .await
    .expect("first advertisement was not sent immediately")
    .expect("socket channel closed");
    assert!(find_lladdr(&advert.msg.options).is_some());
    cancel.cancel();
}
